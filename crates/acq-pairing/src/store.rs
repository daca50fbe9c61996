//! PairingStore - owner of every covariant pairing.
//!
//! Pairings are addressed by [`PairingId`]. The engine only ever takes a
//! snapshot of the active pairings at the start of each event, so edits made
//! while a run is executing take effect at the next event boundary.

use acq_core::data::PropertyId;
use acq_core::error::{AcqError, AcqResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::pairing::{CovariantPairing, CursorUpdate};

/// Version tag written into pairing files.
pub const PAIRINGS_FILE_VERSION: u32 = 1;

/// Stable pairing identity within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingId(pub u64);

impl fmt::Display for PairingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pairing#{}", self.0)
    }
}

#[derive(Serialize, Deserialize)]
struct PairingsFile {
    version: u32,
    pairings: Vec<CovariantPairing>,
}

/// Ordered collection of pairings.
#[derive(Default)]
pub struct PairingStore {
    next_id: AtomicU64,
    pairings: RwLock<Vec<(PairingId, CovariantPairing)>>,
}

impl PairingStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pairing at the end of the list.
    pub fn add(&self, pairing: CovariantPairing) -> PairingId {
        let id = PairingId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        info!(%id, master = %pairing.master, slave = %pairing.slave, "Covariant pairing added");
        self.pairings.write().push((id, pairing));
        id
    }

    /// Remove a pairing.
    pub fn delete(&self, id: PairingId) -> AcqResult<CovariantPairing> {
        let mut pairings = self.pairings.write();
        let index = position(&pairings, id)?;
        let (_, pairing) = pairings.remove(index);
        info!(%id, slave = %pairing.slave, "Covariant pairing deleted");
        Ok(pairing)
    }

    /// Copy of a pairing.
    pub fn get(&self, id: PairingId) -> AcqResult<CovariantPairing> {
        let pairings = self.pairings.read();
        let index = position(&pairings, id)?;
        Ok(pairings[index].1.clone())
    }

    /// Edit a pairing in place.
    pub fn update<T>(&self, id: PairingId, f: impl FnOnce(&mut CovariantPairing) -> AcqResult<T>) -> AcqResult<T> {
        let mut pairings = self.pairings.write();
        let index = position(&pairings, id)?;
        f(&mut pairings[index].1)
    }

    /// Enable or disable a pairing.
    pub fn set_active(&self, id: PairingId, active: bool) -> AcqResult<()> {
        self.update(id, |p| {
            p.active = active;
            Ok(())
        })
    }

    /// Insert a control point into a pairing.
    pub fn add_control_point(&self, id: PairingId, master: f64, slave: f64) -> AcqResult<usize> {
        self.update(id, |p| p.add_control_point(master, slave))
    }

    /// Delete row `row` of a pairing and return the re-validated selection.
    pub fn remove_control_point(&self, id: PairingId, row: usize) -> AcqResult<CursorUpdate> {
        let cursor = self.update(id, |p| p.remove_control_point(row))?;
        debug!(%id, row, remaining = cursor.len, "Control point removed");
        Ok(cursor)
    }

    /// Pairing ids in list order.
    pub fn ids(&self) -> Vec<PairingId> {
        self.pairings.read().iter().map(|(id, _)| *id).collect()
    }

    /// Snapshot of the active pairings, in list order.
    pub fn active_pairings(&self) -> Vec<CovariantPairing> {
        self.pairings
            .read()
            .iter()
            .filter(|(_, p)| p.active)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Whether at least one pairing is active.
    pub fn any_active(&self) -> bool {
        self.pairings.read().iter().any(|(_, p)| p.active)
    }

    /// Pairings driving `slave`.
    pub fn pairings_for_slave(&self, slave: &PropertyId) -> Vec<PairingId> {
        self.pairings
            .read()
            .iter()
            .filter(|(_, p)| &p.slave == slave)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of pairings.
    pub fn len(&self) -> usize {
        self.pairings.read().len()
    }

    /// Whether the store holds no pairings.
    pub fn is_empty(&self) -> bool {
        self.pairings.read().is_empty()
    }

    /// Write every pairing to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> AcqResult<()> {
        let file = PairingsFile {
            version: PAIRINGS_FILE_VERSION,
            pairings: self.pairings.read().iter().map(|(_, p)| p.clone()).collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(path.as_ref(), json)?;
        info!(path = %path.as_ref().display(), count = file.pairings.len(), "Pairings saved");
        Ok(())
    }

    /// Append the pairings stored in a JSON file, returning their new ids.
    pub fn load(&self, path: impl AsRef<Path>) -> AcqResult<Vec<PairingId>> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let file: PairingsFile = serde_json::from_str(&json)?;
        if file.version != PAIRINGS_FILE_VERSION {
            return Err(AcqError::Persistence(format!(
                "unsupported pairings file version {} (expected {})",
                file.version, PAIRINGS_FILE_VERSION
            )));
        }
        let ids = file
            .pairings
            .into_iter()
            .map(|mut p| {
                p.normalize();
                self.add(p)
            })
            .collect::<Vec<_>>();
        info!(path = %path.as_ref().display(), count = ids.len(), "Pairings loaded");
        Ok(ids)
    }
}

fn position(pairings: &[(PairingId, CovariantPairing)], id: PairingId) -> AcqResult<usize> {
    pairings
        .iter()
        .position(|(pid, _)| *pid == id)
        .ok_or_else(|| AcqError::Configuration(format!("{} does not exist", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::CovariantSource;

    fn power_vs_wavelength() -> CovariantPairing {
        CovariantPairing::new(
            CovariantSource::property(PropertyId::new("Laser", "Wavelength")),
            PropertyId::new("Laser", "Power"),
        )
        .with_point(700.0, 10.0)
        .with_point(900.0, 30.0)
    }

    #[test]
    fn active_snapshot_skips_inactive() {
        let store = PairingStore::new();
        let a = store.add(power_vs_wavelength());
        let b = store.add(power_vs_wavelength());
        store.set_active(a, false).unwrap();
        assert!(store.any_active());
        assert_eq!(store.active_pairings().len(), 1);
        store.set_active(b, false).unwrap();
        assert!(!store.any_active());
    }

    #[test]
    fn serial_row_deletes_follow_cursor() {
        let store = PairingStore::new();
        let id = store.add(power_vs_wavelength().with_point(800.0, 20.0));
        let mut cursor = store.remove_control_point(id, 2).unwrap();
        while let Some(row) = cursor.selected {
            cursor = store.remove_control_point(id, row).unwrap();
        }
        assert!(store.get(id).unwrap().points().is_empty());
    }

    #[test]
    fn delete_unknown_pairing_fails() {
        let store = PairingStore::new();
        let id = store.add(power_vs_wavelength());
        store.delete(id).unwrap();
        assert!(store.delete(id).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairings.json");

        let store = PairingStore::new();
        let id = store.add(power_vs_wavelength());
        store.set_active(id, false).unwrap();
        store.save(&path).unwrap();

        let restored = PairingStore::new();
        let ids = restored.load(&path).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(restored.get(ids[0]).unwrap(), store.get(id).unwrap());
    }

    #[test]
    fn loaded_tables_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairings.json");
        std::fs::write(
            &path,
            r#"{"version": 1, "pairings": [{
                "master": {"source": "property", "property": {"device": "Z", "property": "Position"}},
                "slave": {"device": "Laser", "property": "Power"},
                "points": [{"master": 10, "slave": 1}, {"master": 0, "slave": 0}, {"master": 10, "slave": 2}]
            }]}"#,
        )
        .unwrap();
        let store = PairingStore::new();
        let ids = store.load(&path).unwrap();
        let pairing = store.get(ids[0]).unwrap();
        assert!(pairing.active);
        assert_eq!(pairing.points().len(), 2);
        assert_eq!(pairing.value_for(10.0), Some(2.0));
    }

    #[test]
    fn rejects_unknown_file_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairings.json");
        std::fs::write(&path, r#"{"version": 99, "pairings": []}"#).unwrap();
        assert!(matches!(PairingStore::new().load(&path), Err(AcqError::Persistence(_))));
    }
}
