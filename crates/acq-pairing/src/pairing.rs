//! A single master → slave pairing and its control-point table.

use acq_core::data::PropertyId;
use acq_core::error::{AcqError, AcqResult};
use acq_geometry::SurfaceId;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::surface_data::SurfaceDataKind;

/// Where a pairing reads its master value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CovariantSource {
    /// A device property, sampled from the commanded value when the engine
    /// has just set it, otherwise read back from the device.
    Property {
        /// Property providing the master value
        property: PropertyId,
    },
    /// A quantity derived from a sample surface at the current tile.
    SurfaceData {
        surface: SurfaceId,
        kind: SurfaceDataKind,
    },
}

impl CovariantSource {
    /// Master backed by a device property.
    pub fn property(property: PropertyId) -> Self {
        CovariantSource::Property { property }
    }
}

impl fmt::Display for CovariantSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovariantSource::Property { property } => write!(f, "{}", property),
            CovariantSource::SurfaceData { surface, kind } => write!(f, "{}: {}", surface, kind),
        }
    }
}

/// One `(master, slave)` row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub master: f64,
    pub slave: f64,
}

/// Selection after a row deletion. `None` when the table became empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorUpdate {
    pub selected: Option<usize>,
    /// Rows remaining
    pub len: usize,
}

impl CursorUpdate {
    /// Re-validate a selection that pointed at `removed` in a table that now
    /// has `len` rows.
    pub fn after_removal(removed: usize, len: usize) -> Self {
        let selected = if len == 0 {
            None
        } else {
            Some(removed.min(len - 1))
        };
        Self { selected, len }
    }
}

/// A slave property driven by a master quantity.
///
/// Control points are kept sorted by master value with no two rows sharing a
/// master, so interpolation can binary-search the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariantPairing {
    pub master: CovariantSource,
    pub slave: PropertyId,
    points: Vec<ControlPoint>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl CovariantPairing {
    /// Empty, active pairing.
    pub fn new(master: CovariantSource, slave: PropertyId) -> Self {
        Self {
            master,
            slave,
            points: Vec::new(),
            active: true,
        }
    }

    /// Builder-style control point insertion.
    pub fn with_point(mut self, master: f64, slave: f64) -> Self {
        let _ = self.add_control_point(master, slave);
        self
    }

    /// Control points sorted by master value.
    pub fn points(&self) -> &[ControlPoint] {
        &self.points
    }

    /// Insert a row, returning its index in the sorted table.
    ///
    /// A row whose master equals an existing one replaces that row's slave
    /// value.
    pub fn add_control_point(&mut self, master: f64, slave: f64) -> AcqResult<usize> {
        if !master.is_finite() || !slave.is_finite() {
            return Err(AcqError::Configuration(format!(
                "control point ({}, {}) for {} must be finite",
                master, slave, self.slave
            )));
        }
        match self.points.binary_search_by(|p| p.master.total_cmp(&master)) {
            Ok(i) => {
                self.points[i].slave = slave;
                Ok(i)
            }
            Err(i) => {
                self.points.insert(i, ControlPoint { master, slave });
                Ok(i)
            }
        }
    }

    /// Restore ordering after deserialization: sort by master and keep the
    /// last row of any duplicated master.
    pub(crate) fn normalize(&mut self) {
        self.points.retain(|p| p.master.is_finite() && p.slave.is_finite());
        self.points.sort_by(|a, b| a.master.total_cmp(&b.master));
        let mut deduped: Vec<ControlPoint> = Vec::with_capacity(self.points.len());
        for point in self.points.drain(..) {
            match deduped.last_mut() {
                Some(last) if last.master == point.master => *last = point,
                _ => deduped.push(point),
            }
        }
        self.points = deduped;
    }

    /// Remove the row at `index` and return the re-validated selection.
    pub fn remove_control_point(&mut self, index: usize) -> AcqResult<CursorUpdate> {
        if index >= self.points.len() {
            return Err(AcqError::IndexOutOfRange {
                index,
                len: self.points.len(),
            });
        }
        self.points.remove(index);
        Ok(CursorUpdate::after_removal(index, self.points.len()))
    }

    /// Slave value for `master`.
    ///
    /// Linear between the two bracketing control points and clamped to the
    /// first/last slave value outside the table. `None` without points or
    /// for a non-finite master.
    pub fn value_for(&self, master: f64) -> Option<f64> {
        if !master.is_finite() {
            return None;
        }
        let first = self.points.first()?;
        let last = self.points.last()?;
        if master <= first.master {
            return Some(first.slave);
        }
        if master >= last.master {
            return Some(last.slave);
        }
        // first.master < master < last.master, so 1 <= upper < len
        let upper = self.points.partition_point(|p| p.master <= master);
        let (lo, hi) = (self.points[upper - 1], self.points[upper]);
        let t = (master - lo.master) / (hi.master - lo.master);
        Some(lo.slave + t * (hi.slave - lo.slave))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairing() -> CovariantPairing {
        CovariantPairing::new(
            CovariantSource::property(PropertyId::new("Laser", "Wavelength")),
            PropertyId::new("Laser", "Power"),
        )
        .with_point(0.0, 0.0)
        .with_point(10.0, 100.0)
    }

    #[test]
    fn interpolates_and_clamps() {
        let p = pairing();
        assert_eq!(p.value_for(5.0), Some(50.0));
        assert_eq!(p.value_for(-5.0), Some(0.0));
        assert_eq!(p.value_for(15.0), Some(100.0));
        assert_eq!(p.value_for(10.0), Some(100.0));
    }

    #[test]
    fn picks_bracketing_segment() {
        let p = pairing().with_point(20.0, 0.0);
        assert_eq!(p.value_for(15.0), Some(50.0));
        assert_eq!(p.value_for(2.5), Some(25.0));
    }

    #[test]
    fn empty_table_has_no_value() {
        let p = CovariantPairing::new(
            CovariantSource::property(PropertyId::new("A", "x")),
            PropertyId::new("B", "y"),
        );
        assert_eq!(p.value_for(1.0), None);
    }

    #[test]
    fn non_finite_master_has_no_value() {
        let p = pairing().with_point(20.0, 0.0);
        assert_eq!(p.value_for(f64::NAN), None);
        assert_eq!(p.value_for(f64::INFINITY), None);
        assert_eq!(p.value_for(f64::NEG_INFINITY), None);
    }

    #[test]
    fn rows_stay_sorted_without_duplicate_masters() {
        let mut p = pairing();
        assert_eq!(p.add_control_point(5.0, 7.0).unwrap(), 1);
        assert_eq!(p.add_control_point(5.0, 9.0).unwrap(), 1);
        let masters: Vec<f64> = p.points().iter().map(|c| c.master).collect();
        assert_eq!(masters, vec![0.0, 5.0, 10.0]);
        assert_eq!(p.points()[1].slave, 9.0);
        assert!(p.add_control_point(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn deleting_last_row_moves_selection_up() {
        let mut p = pairing().with_point(20.0, 0.0);
        let cursor = p.remove_control_point(2).unwrap();
        assert_eq!(cursor, CursorUpdate { selected: Some(1), len: 2 });
        let cursor = p.remove_control_point(cursor.selected.unwrap()).unwrap();
        assert_eq!(cursor.selected, Some(0));
        let cursor = p.remove_control_point(cursor.selected.unwrap()).unwrap();
        assert_eq!(cursor.selected, None);
        assert!(p.points().is_empty());
    }

    #[test]
    fn deleting_middle_row_keeps_selection() {
        let mut p = pairing().with_point(20.0, 0.0);
        let cursor = p.remove_control_point(1).unwrap();
        assert_eq!(cursor.selected, Some(1));
        assert_eq!(p.points()[1].master, 20.0);
        assert!(p.remove_control_point(5).is_err());
    }
}
