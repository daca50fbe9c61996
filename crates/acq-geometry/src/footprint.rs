//! Footprints: the XY tile set an acquisition covers.

use serde::{Deserialize, Serialize};

use crate::region::RegionId;
use crate::surface::SurfaceId;

/// Upper bound on tiles produced by a single footprint.
pub const MAX_TILES: usize = 100_000;

/// Source of XY tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Footprint {
    Region(RegionId),
    Surface(SurfaceId),
}

/// One tile of a footprint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TilePosition {
    /// Index within the footprint's enumeration
    pub index: usize,
    pub row: usize,
    pub column: usize,
    pub x: f64,
    pub y: f64,
}

/// Tile pitch for a tile size and overlap percentage in `[0, 99)`.
pub fn tile_pitch(tile_width: f64, tile_height: f64, overlap_percent: f64) -> (f64, f64) {
    let keep = 1.0 - overlap_percent / 100.0;
    (tile_width * keep, tile_height * keep)
}

/// Whether an overlap percentage is acceptable.
pub fn valid_overlap(overlap_percent: f64) -> bool {
    overlap_percent.is_finite() && (0.0..99.0).contains(&overlap_percent)
}
