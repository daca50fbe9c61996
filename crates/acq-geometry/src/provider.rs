//! GeometryProvider - indexed store of surfaces and regions.
//!
//! Surfaces and regions are owned here by value and addressed by id.
//! Acquisition settings only hold ids, so deleting a surface can never leave
//! a dangling reference: the next expansion that resolves the id fails with
//! a configuration error instead.
//!
//! # Locking
//!
//! Each surface and region sits behind its own `parking_lot::Mutex`. Point
//! mutation and the lazy interpolation rebuild both take that lock, so a
//! reader either gets the previous complete model or the rebuilt one. The map
//! of entries is behind an `RwLock` that is only held long enough to look up
//! or insert an entry.

use acq_core::config::TilingConfig;
use acq_core::error::{AcqError, AcqResult};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::footprint::{tile_pitch, valid_overlap, Footprint, TilePosition, MAX_TILES};
use crate::hull::Point2;
use crate::region::{Region, RegionId};
use crate::surface::{InterpolationMethod, Point3, Surface, SurfaceId, SurfaceModel};

struct SurfaceEntry {
    surface: Surface,
    /// `None` when stale.
    model: Option<Arc<SurfaceModel>>,
}

/// Summary row for listing surfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceInfo {
    pub id: SurfaceId,
    pub name: String,
    pub num_points: usize,
}

/// Summary row for listing regions.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionInfo {
    pub id: RegionId,
    pub name: String,
    pub rows: usize,
    pub columns: usize,
}

/// Owner of all surfaces and regions.
pub struct GeometryProvider {
    tiling: TilingConfig,
    next_id: AtomicU64,
    surfaces: RwLock<BTreeMap<SurfaceId, Arc<Mutex<SurfaceEntry>>>>,
    regions: RwLock<BTreeMap<RegionId, Arc<Mutex<Region>>>>,
}

impl GeometryProvider {
    /// Create an empty provider using the camera field of view in `tiling`.
    pub fn new(tiling: TilingConfig) -> Self {
        Self {
            tiling,
            next_id: AtomicU64::new(1),
            surfaces: RwLock::new(BTreeMap::new()),
            regions: RwLock::new(BTreeMap::new()),
        }
    }

    /// Tile size and interpolation defaults.
    pub fn tiling(&self) -> TilingConfig {
        self.tiling
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Surfaces
    // =========================================================================

    /// Create an empty surface with the default interpolation method.
    pub fn add_surface(&self, name: impl Into<String>) -> SurfaceId {
        let method = InterpolationMethod::InverseDistance {
            power: self.tiling.interpolation_power,
        };
        self.insert_surface(Surface::new(name, method))
    }

    /// Insert a fully specified surface.
    pub fn insert_surface(&self, surface: Surface) -> SurfaceId {
        let id = SurfaceId(self.allocate_id());
        info!(surface = %surface.name, %id, points = surface.points.len(), "Surface created");
        self.surfaces.write().insert(
            id,
            Arc::new(Mutex::new(SurfaceEntry {
                surface,
                model: None,
            })),
        );
        id
    }

    fn surface_entry(&self, id: SurfaceId) -> AcqResult<Arc<Mutex<SurfaceEntry>>> {
        self.surfaces
            .read()
            .get(&id)
            .cloned()
            .ok_or(AcqError::UnresolvedSurface(id.0))
    }

    fn mutate_surface<T>(&self, id: SurfaceId, f: impl FnOnce(&mut Surface) -> AcqResult<T>) -> AcqResult<T> {
        let entry = self.surface_entry(id)?;
        let mut guard = entry.lock();
        let out = f(&mut guard.surface)?;
        guard.model = None;
        Ok(out)
    }

    /// Append a control point, returning its index.
    pub fn add_point(&self, id: SurfaceId, point: Point3) -> AcqResult<usize> {
        self.mutate_surface(id, |s| {
            s.points.push(point);
            Ok(s.points.len() - 1)
        })
    }

    /// Remove the control point at `index`.
    pub fn remove_point(&self, id: SurfaceId, index: usize) -> AcqResult<Point3> {
        self.mutate_surface(id, |s| {
            if index >= s.points.len() {
                return Err(AcqError::IndexOutOfRange {
                    index,
                    len: s.points.len(),
                });
            }
            Ok(s.points.remove(index))
        })
    }

    /// Move the control point at `index`.
    pub fn move_point(&self, id: SurfaceId, index: usize, point: Point3) -> AcqResult<()> {
        self.mutate_surface(id, |s| {
            let len = s.points.len();
            let slot = s
                .points
                .get_mut(index)
                .ok_or(AcqError::IndexOutOfRange { index, len })?;
            *slot = point;
            Ok(())
        })
    }

    /// Change the interpolation method.
    pub fn set_method(&self, id: SurfaceId, method: InterpolationMethod) -> AcqResult<()> {
        self.mutate_surface(id, |s| {
            s.method = method;
            Ok(())
        })
    }

    /// Rename a surface.
    pub fn rename_surface(&self, id: SurfaceId, name: impl Into<String>) -> AcqResult<()> {
        let name = name.into();
        self.mutate_surface(id, |s| {
            s.name = name;
            Ok(())
        })
    }

    /// Copy of the editable surface record.
    pub fn surface(&self, id: SurfaceId) -> AcqResult<Surface> {
        Ok(self.surface_entry(id)?.lock().surface.clone())
    }

    /// Current interpolation snapshot, rebuilt if stale.
    pub fn surface_model(&self, id: SurfaceId) -> AcqResult<Arc<SurfaceModel>> {
        let entry = self.surface_entry(id)?;
        let mut guard = entry.lock();
        if let Some(model) = &guard.model {
            return Ok(model.clone());
        }
        if guard.surface.points.is_empty() {
            return Err(AcqError::NotInterpolated(guard.surface.name.clone()));
        }
        debug!(surface = %guard.surface.name, points = guard.surface.points.len(), "Rebuilding interpolation");
        let model = Arc::new(SurfaceModel::build(id, &guard.surface));
        guard.model = Some(model.clone());
        Ok(model)
    }

    /// Interpolated Z of `surface` at `(x, y)`.
    ///
    /// Positions outside the surface boundary are clamped to the nearest
    /// control point and logged as a warning.
    pub fn interpolated_z(&self, id: SurfaceId, x: f64, y: f64) -> AcqResult<f64> {
        Ok(self.surface_model(id)?.interpolated_z(x, y))
    }

    /// Convex boundary of the surface's control points.
    pub fn boundary(&self, id: SurfaceId) -> AcqResult<Vec<Point2>> {
        Ok(self.surface_model(id)?.boundary().vertices().to_vec())
    }

    /// Delete a surface. Settings still referencing it fail at next expansion.
    pub fn delete_surface(&self, id: SurfaceId) -> AcqResult<Surface> {
        let entry = self
            .surfaces
            .write()
            .remove(&id)
            .ok_or(AcqError::UnresolvedSurface(id.0))?;
        let surface = entry.lock().surface.clone();
        info!(surface = %surface.name, %id, "Surface deleted");
        Ok(surface)
    }

    /// Delete every surface.
    pub fn delete_all_surfaces(&self) -> usize {
        let mut map = self.surfaces.write();
        let n = map.len();
        map.clear();
        info!(count = n, "All surfaces deleted");
        n
    }

    /// Surfaces in creation order.
    pub fn surfaces(&self) -> Vec<SurfaceInfo> {
        self.surfaces
            .read()
            .iter()
            .map(|(id, entry)| {
                let guard = entry.lock();
                SurfaceInfo {
                    id: *id,
                    name: guard.surface.name.clone(),
                    num_points: guard.surface.points.len(),
                }
            })
            .collect()
    }

    /// Look up a surface by name.
    pub fn find_surface(&self, name: &str) -> Option<SurfaceId> {
        self.surfaces().into_iter().find(|s| s.name == name).map(|s| s.id)
    }

    // =========================================================================
    // Regions
    // =========================================================================

    /// Create a region.
    pub fn add_region(&self, region: Region) -> RegionId {
        let id = RegionId(self.allocate_id());
        info!(region = %region.name, %id, rows = region.rows, columns = region.columns, "Region created");
        self.regions.write().insert(id, Arc::new(Mutex::new(region)));
        id
    }

    fn region_entry(&self, id: RegionId) -> AcqResult<Arc<Mutex<Region>>> {
        self.regions
            .read()
            .get(&id)
            .cloned()
            .ok_or(AcqError::UnresolvedRegion(id.0))
    }

    /// Copy of a region.
    pub fn region(&self, id: RegionId) -> AcqResult<Region> {
        Ok(self.region_entry(id)?.lock().clone())
    }

    /// Replace a region's grid in place.
    pub fn update_region(&self, id: RegionId, f: impl FnOnce(&mut Region)) -> AcqResult<()> {
        let entry = self.region_entry(id)?;
        f(&mut entry.lock());
        Ok(())
    }

    /// Delete a region. Settings still referencing it fail at next expansion.
    pub fn delete_region(&self, id: RegionId) -> AcqResult<Region> {
        let entry = self
            .regions
            .write()
            .remove(&id)
            .ok_or(AcqError::UnresolvedRegion(id.0))?;
        let region = entry.lock().clone();
        info!(region = %region.name, %id, "Region deleted");
        Ok(region)
    }

    /// Delete every region.
    pub fn delete_all_regions(&self) -> usize {
        let mut map = self.regions.write();
        let n = map.len();
        map.clear();
        info!(count = n, "All regions deleted");
        n
    }

    /// Regions in creation order.
    pub fn regions(&self) -> Vec<RegionInfo> {
        self.regions
            .read()
            .iter()
            .map(|(id, entry)| {
                let guard = entry.lock();
                RegionInfo {
                    id: *id,
                    name: guard.name.clone(),
                    rows: guard.rows,
                    columns: guard.columns,
                }
            })
            .collect()
    }

    /// Look up a region by name.
    pub fn find_region(&self, name: &str) -> Option<RegionId> {
        self.regions().into_iter().find(|r| r.name == name).map(|r| r.id)
    }

    // =========================================================================
    // Footprints
    // =========================================================================

    /// Display name of a footprint's source.
    pub fn footprint_name(&self, footprint: &Footprint) -> AcqResult<String> {
        match footprint {
            Footprint::Region(id) => Ok(self.region_entry(*id)?.lock().name.clone()),
            Footprint::Surface(id) => Ok(self.surface_entry(*id)?.lock().surface.name.clone()),
        }
    }

    /// Tile centres covering `footprint` at `overlap_percent`, row-major.
    ///
    /// The result depends only on the footprint's current state, so repeated
    /// calls without intervening edits return identical sequences. It may be
    /// empty when a surface boundary touches no tile.
    pub fn tiles_for(&self, footprint: &Footprint, overlap_percent: f64) -> AcqResult<Vec<TilePosition>> {
        match footprint {
            Footprint::Region(id) => {
                let (px, py) = self.pitch(overlap_percent)?;
                let region = self.region(*id)?;
                check_tile_bound(region.rows, region.columns)?;
                Ok(numbered(region.tile_centers(px, py)))
            }
            Footprint::Surface(id) => self.tiles_for_model(&*self.surface_model(*id)?, overlap_percent),
        }
    }

    /// Tiles touching the convex hull of a surface snapshot.
    ///
    /// Callers that also sample Z from `model` use this so tiles and heights
    /// come from the same state of the surface.
    pub fn tiles_for_model(&self, model: &SurfaceModel, overlap_percent: f64) -> AcqResult<Vec<TilePosition>> {
        let (px, py) = self.pitch(overlap_percent)?;
        let (w, h) = (self.tiling.tile_width_um, self.tiling.tile_height_um);
        let hull = model.boundary();
        let Some((min, max)) = hull.bounds() else {
            return Ok(Vec::new());
        };
        let columns = tiles_along(max.x - min.x, w, px);
        let rows = tiles_along(max.y - min.y, h, py);
        check_tile_bound(rows, columns)?;
        let grid = Region::new(
            model.name(),
            Point2::new((min.x + max.x) / 2.0, (min.y + max.y) / 2.0),
            rows,
            columns,
        );
        Ok(numbered(
            grid.tile_centers(px, py)
                .into_iter()
                .filter(|(_, _, center)| hull.intersects_rect(*center, w, h))
                .collect(),
        ))
    }

    fn pitch(&self, overlap_percent: f64) -> AcqResult<(f64, f64)> {
        if !valid_overlap(overlap_percent) {
            return Err(AcqError::Configuration(format!(
                "tile overlap must be in [0, 99) percent (got {})",
                overlap_percent
            )));
        }
        Ok(tile_pitch(
            self.tiling.tile_width_um,
            self.tiling.tile_height_um,
            overlap_percent,
        ))
    }
}

fn numbered(candidates: Vec<(usize, usize, Point2)>) -> Vec<TilePosition> {
    candidates
        .into_iter()
        .enumerate()
        .map(|(index, (row, column, c))| TilePosition {
            index,
            row,
            column,
            x: c.x,
            y: c.y,
        })
        .collect()
}

fn tiles_along(span: f64, tile: f64, pitch: f64) -> usize {
    if span <= tile {
        1
    } else {
        ((span - tile) / pitch).ceil() as usize + 1
    }
}

fn check_tile_bound(rows: usize, columns: usize) -> AcqResult<()> {
    match rows.checked_mul(columns) {
        Some(n) if n <= MAX_TILES => Ok(()),
        _ => Err(AcqError::Configuration(format!(
            "footprint of {} x {} tiles exceeds the limit of {} tiles",
            rows, columns, MAX_TILES
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GeometryProvider {
        GeometryProvider::new(TilingConfig {
            tile_width_um: 100.0,
            tile_height_um: 100.0,
            interpolation_power: 2.0,
        })
    }

    #[test]
    fn region_tiles_are_row_major() {
        let geo = provider();
        let id = geo.add_region(Region::new("grid", Point2::new(0.0, 0.0), 2, 3));
        let tiles = geo.tiles_for(&Footprint::Region(id), 0.0).unwrap();
        assert_eq!(tiles.len(), 6);
        assert_eq!((tiles[0].x, tiles[0].y), (-100.0, -50.0));
        assert_eq!((tiles[1].x, tiles[1].y), (0.0, -50.0));
        assert_eq!((tiles[3].x, tiles[3].y), (-100.0, 50.0));
        assert_eq!(tiles[5].index, 5);
    }

    #[test]
    fn overlap_shrinks_pitch() {
        let geo = provider();
        let id = geo.add_region(Region::new("grid", Point2::new(0.0, 0.0), 1, 2));
        let tiles = geo.tiles_for(&Footprint::Region(id), 10.0).unwrap();
        assert!((tiles[1].x - tiles[0].x - 90.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_overlap_rejected() {
        let geo = provider();
        let id = geo.add_region(Region::new("grid", Point2::new(0.0, 0.0), 1, 1));
        assert!(geo.tiles_for(&Footprint::Region(id), 99.0).is_err());
        assert!(geo.tiles_for(&Footprint::Region(id), -1.0).is_err());
    }

    #[test]
    fn surface_tiles_cover_hull_only() {
        let geo = provider();
        let id = geo.add_surface("triangle");
        geo.add_point(id, Point3::new(0.0, 0.0, 0.0)).unwrap();
        geo.add_point(id, Point3::new(400.0, 0.0, 0.0)).unwrap();
        geo.add_point(id, Point3::new(0.0, 400.0, 0.0)).unwrap();
        let tiles = geo.tiles_for(&Footprint::Surface(id), 0.0).unwrap();
        // 4x4 bounding grid minus the three far-corner tiles the triangle never reaches.
        assert_eq!(tiles.len(), 13);
        assert!(tiles.iter().all(|t| t.x + t.y <= 500.0));
        let again = geo.tiles_for(&Footprint::Surface(id), 0.0).unwrap();
        assert_eq!(tiles, again);
    }

    #[test]
    fn model_snapshot_tiles_ignore_later_edits() {
        let geo = provider();
        let id = geo.add_surface("triangle");
        geo.add_point(id, Point3::new(0.0, 0.0, 0.0)).unwrap();
        geo.add_point(id, Point3::new(400.0, 0.0, 0.0)).unwrap();
        geo.add_point(id, Point3::new(0.0, 400.0, 0.0)).unwrap();
        let snapshot = geo.surface_model(id).unwrap();
        let before = geo.tiles_for_model(&snapshot, 0.0).unwrap();
        assert_eq!(before, geo.tiles_for(&Footprint::Surface(id), 0.0).unwrap());

        geo.add_point(id, Point3::new(400.0, 400.0, 0.0)).unwrap();
        let live = geo.tiles_for(&Footprint::Surface(id), 0.0).unwrap();
        assert_eq!(live.len(), 16);
        assert_eq!(geo.tiles_for_model(&snapshot, 0.0).unwrap(), before);
    }

    #[test]
    fn empty_surface_is_not_interpolated() {
        let geo = provider();
        let id = geo.add_surface("empty");
        assert!(matches!(
            geo.interpolated_z(id, 0.0, 0.0),
            Err(AcqError::NotInterpolated(_))
        ));
    }

    #[test]
    fn point_edits_invalidate_model() {
        let geo = provider();
        let id = geo.add_surface("s");
        geo.add_point(id, Point3::new(0.0, 0.0, 5.0)).unwrap();
        assert_eq!(geo.interpolated_z(id, 0.0, 0.0).unwrap(), 5.0);
        geo.move_point(id, 0, Point3::new(0.0, 0.0, 7.0)).unwrap();
        assert_eq!(geo.interpolated_z(id, 0.0, 0.0).unwrap(), 7.0);
        geo.remove_point(id, 0).unwrap();
        assert!(geo.interpolated_z(id, 0.0, 0.0).is_err());
    }

    #[test]
    fn deleted_references_do_not_resolve() {
        let geo = provider();
        let s = geo.add_surface("s");
        let r = geo.add_region(Region::new("r", Point2::new(0.0, 0.0), 1, 1));
        geo.delete_surface(s).unwrap();
        geo.delete_region(r).unwrap();
        assert!(matches!(geo.surface_model(s), Err(AcqError::UnresolvedSurface(_))));
        assert!(matches!(
            geo.tiles_for(&Footprint::Region(r), 0.0),
            Err(AcqError::UnresolvedRegion(_))
        ));
    }

    #[test]
    fn delete_all() {
        let geo = provider();
        geo.add_surface("a");
        geo.add_surface("b");
        geo.add_region(Region::new("r", Point2::new(0.0, 0.0), 1, 1));
        assert_eq!(geo.delete_all_surfaces(), 2);
        assert_eq!(geo.delete_all_regions(), 1);
        assert!(geo.surfaces().is_empty());
        assert!(geo.regions().is_empty());
    }

    #[test]
    fn oversized_grid_rejected() {
        let geo = provider();
        let id = geo.add_region(Region::new("huge", Point2::new(0.0, 0.0), 1000, 1000));
        assert!(matches!(
            geo.tiles_for(&Footprint::Region(id), 0.0),
            Err(AcqError::Configuration(_))
        ));
    }
}
