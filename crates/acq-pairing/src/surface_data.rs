//! Surface-derived master quantities.
//!
//! The quantities are signed distances along Z between the current focus
//! position and a sample surface, evaluated at the current tile. Choosing
//! which surfaces to expose as masters is a request/response exchange with
//! whoever drives the UI: the core calls [`SurfaceDataPrompt::choose`] and
//! blocks until it answers.

use acq_core::error::{AcqError, AcqResult};
use acq_geometry::{GeometryProvider, SurfaceId, SurfaceInfo, SurfaceModel};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::pairing::CovariantSource;

/// Which surface quantity a master reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceDataKind {
    /// `z - surface(x, y)` at the tile centre.
    DistanceBelowSurfaceCenter,
    /// Smallest `z - surface` over the four tile corners.
    DistanceBelowSurfaceMinimum,
    /// Largest `z - surface` over the four tile corners.
    DistanceBelowSurfaceMaximum,
}

impl SurfaceDataKind {
    /// Every kind, in menu order.
    pub const ALL: [SurfaceDataKind; 3] = [
        SurfaceDataKind::DistanceBelowSurfaceCenter,
        SurfaceDataKind::DistanceBelowSurfaceMinimum,
        SurfaceDataKind::DistanceBelowSurfaceMaximum,
    ];

    /// Evaluate for a tile of `tile_width x tile_height` centred on `(x, y)`
    /// with focus at `z`.
    pub fn evaluate(
        self,
        model: &SurfaceModel,
        x: f64,
        y: f64,
        z: f64,
        tile_width: f64,
        tile_height: f64,
    ) -> f64 {
        let below = |px: f64, py: f64| z - model.sample(px, py).z;
        match self {
            SurfaceDataKind::DistanceBelowSurfaceCenter => below(x, y),
            SurfaceDataKind::DistanceBelowSurfaceMinimum | SurfaceDataKind::DistanceBelowSurfaceMaximum => {
                let (hw, hh) = (tile_width / 2.0, tile_height / 2.0);
                let corners = [
                    below(x - hw, y - hh),
                    below(x + hw, y - hh),
                    below(x + hw, y + hh),
                    below(x - hw, y + hh),
                ];
                let fold = if self == SurfaceDataKind::DistanceBelowSurfaceMinimum {
                    f64::min
                } else {
                    f64::max
                };
                corners[1..].iter().copied().fold(corners[0], fold)
            }
        }
    }
}

impl fmt::Display for SurfaceDataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SurfaceDataKind::DistanceBelowSurfaceCenter => "Distance below surface (center)",
            SurfaceDataKind::DistanceBelowSurfaceMinimum => "Distance below surface (minimum)",
            SurfaceDataKind::DistanceBelowSurfaceMaximum => "Distance below surface (maximum)",
        };
        f.write_str(label)
    }
}

/// Answer to a surface-data import request.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceDataSelection {
    pub kind: SurfaceDataKind,
    pub surfaces: Vec<SurfaceId>,
}

/// Synchronous request/response hook used to pick surface-data masters.
pub trait SurfaceDataPrompt {
    /// Choose a quantity and the surfaces it applies to. `None` cancels.
    fn choose(&self, surfaces: &[SurfaceInfo], kinds: &[SurfaceDataKind]) -> Option<SurfaceDataSelection>;
}

/// Ask `prompt` which surface quantities to expose and return them as master
/// sources. A cancelled prompt yields no sources.
pub fn import_surface_data(
    geometry: &GeometryProvider,
    prompt: &dyn SurfaceDataPrompt,
) -> AcqResult<Vec<CovariantSource>> {
    let surfaces = geometry.surfaces();
    let Some(selection) = prompt.choose(&surfaces, &SurfaceDataKind::ALL) else {
        return Ok(Vec::new());
    };

    let mut sources = Vec::with_capacity(selection.surfaces.len());
    for id in selection.surfaces {
        if !surfaces.iter().any(|s| s.id == id) {
            return Err(AcqError::UnresolvedSurface(id.0));
        }
        sources.push(CovariantSource::SurfaceData {
            surface: id,
            kind: selection.kind,
        });
    }
    info!(kind = %selection.kind, count = sources.len(), "Imported surface data masters");
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_core::config::TilingConfig;
    use acq_geometry::Point3;

    fn tilted(geo: &GeometryProvider) -> SurfaceId {
        let id = geo.add_surface("tilted");
        // z = x / 10 over a 200 x 200 square
        for (x, y) in [(0.0, 0.0), (200.0, 0.0), (200.0, 200.0), (0.0, 200.0)] {
            geo.add_point(id, Point3::new(x, y, x / 10.0)).unwrap();
        }
        id
    }

    #[test]
    fn center_and_corner_distances() {
        let geo = GeometryProvider::new(TilingConfig::default());
        let id = tilted(&geo);
        let model = geo.surface_model(id).unwrap();

        let center = SurfaceDataKind::DistanceBelowSurfaceCenter.evaluate(&model, 100.0, 100.0, 30.0, 100.0, 100.0);
        assert!((center - 20.0).abs() < 1e-9);

        // Corners at x = 50 and x = 150 give surface z 5 and 15.
        let min = SurfaceDataKind::DistanceBelowSurfaceMinimum.evaluate(&model, 100.0, 100.0, 30.0, 100.0, 100.0);
        let max = SurfaceDataKind::DistanceBelowSurfaceMaximum.evaluate(&model, 100.0, 100.0, 30.0, 100.0, 100.0);
        assert!(min < center && center < max);
        assert!(min > 10.0 && max < 30.0);
    }

    struct Answer(Option<SurfaceDataSelection>);

    impl SurfaceDataPrompt for Answer {
        fn choose(&self, _: &[SurfaceInfo], kinds: &[SurfaceDataKind]) -> Option<SurfaceDataSelection> {
            assert_eq!(kinds.len(), 3);
            self.0.clone()
        }
    }

    #[test]
    fn import_returns_selected_sources() {
        let geo = GeometryProvider::new(TilingConfig::default());
        let id = tilted(&geo);
        let prompt = Answer(Some(SurfaceDataSelection {
            kind: SurfaceDataKind::DistanceBelowSurfaceMaximum,
            surfaces: vec![id],
        }));
        let sources = import_surface_data(&geo, &prompt).unwrap();
        assert_eq!(
            sources,
            vec![CovariantSource::SurfaceData {
                surface: id,
                kind: SurfaceDataKind::DistanceBelowSurfaceMaximum
            }]
        );

        assert!(import_surface_data(&geo, &Answer(None)).unwrap().is_empty());

        let stale = Answer(Some(SurfaceDataSelection {
            kind: SurfaceDataKind::DistanceBelowSurfaceCenter,
            surfaces: vec![SurfaceId(999)],
        }));
        assert!(matches!(
            import_surface_data(&geo, &stale),
            Err(AcqError::UnresolvedSurface(999))
        ));
    }
}
