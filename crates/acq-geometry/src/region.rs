//! Rectangular tile grids.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hull::Point2;

/// Stable region identity within one [`GeometryProvider`](crate::GeometryProvider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub u64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region#{}", self.0)
    }
}

/// A grid of `rows x columns` tiles centred on `center`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub center: Point2,
    pub rows: usize,
    pub columns: usize,
}

impl Region {
    /// Build a region.
    pub fn new(name: impl Into<String>, center: Point2, rows: usize, columns: usize) -> Self {
        Self {
            name: name.into(),
            center,
            rows,
            columns,
        }
    }

    /// Number of tiles regardless of overlap.
    pub fn tile_count(&self) -> usize {
        self.rows.saturating_mul(self.columns)
    }

    /// Tile centres, row-major, for the given pitch.
    pub(crate) fn tile_centers(&self, pitch_x: f64, pitch_y: f64) -> Vec<(usize, usize, Point2)> {
        let x0 = self.center.x - (self.columns.saturating_sub(1)) as f64 * pitch_x / 2.0;
        let y0 = self.center.y - (self.rows.saturating_sub(1)) as f64 * pitch_y / 2.0;
        let mut tiles = Vec::with_capacity(self.tile_count());
        for row in 0..self.rows {
            for col in 0..self.columns {
                tiles.push((
                    row,
                    col,
                    Point2::new(x0 + col as f64 * pitch_x, y0 + row as f64 * pitch_y),
                ));
            }
        }
        tiles
    }
}
