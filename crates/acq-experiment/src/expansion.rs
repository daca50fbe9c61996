//! Expansion - settings to an ordered event sequence.
//!
//! [`expand`] resolves a settings' footprint and surfaces against the
//! geometry store and flattens the result into [`AcquisitionEvent`]s ordered
//! time point → XY position → Z slice → channel.
//!
//! Expansion never touches hardware and depends only on the settings and the
//! current geometry, so calling it twice without intervening edits yields the
//! same sequence. Every configuration error surfaces here, before a run
//! starts.

use acq_core::error::{AcqError, AcqResult};
use acq_geometry::{Footprint, GeometryProvider, SurfaceModel, TilePosition};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::settings::{AcquisitionSettings, FootprintSource, SpaceMode, MAX_SLICES};

const Z_EPS: f64 = 1e-9;

/// One image to acquire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionEvent {
    pub time_index: usize,
    pub position_index: usize,
    pub slice_index: usize,
    pub channel_index: usize,
    pub channel: String,
    /// Stage target, `None` when the mode does not move the stage
    pub position: Option<(f64, f64)>,
    /// Focus target before autofocus offsets, `None` to stay at the current Z
    pub z: Option<f64>,
    /// First event of its (time, position) with autofocus enabled
    pub autofocus_pending: bool,
}

/// One XY position and its Z slices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionPlan {
    pub position: Option<(f64, f64)>,
    /// `[None]` for modes without a Z dimension
    pub slices: Vec<Option<f64>>,
}

/// Result of [`expand`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpandedAcquisition {
    pub name: String,
    pub interval: Duration,
    pub num_time_points: usize,
    pub positions: Vec<PositionPlan>,
    pub channels: Vec<String>,
    events: Vec<AcquisitionEvent>,
    per_time_point: usize,
}

impl ExpandedAcquisition {
    /// All events in execution order.
    pub fn events(&self) -> &[AcquisitionEvent] {
        &self.events
    }

    /// Events of time point `t`; empty past the last time point.
    pub fn time_point(&self, t: usize) -> &[AcquisitionEvent] {
        let start = t.saturating_mul(self.per_time_point).min(self.events.len());
        let end = start.saturating_add(self.per_time_point).min(self.events.len());
        &self.events[start..end]
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether there is nothing to acquire.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Expand `settings` against the current geometry.
pub fn expand(settings: &AcquisitionSettings, geometry: &GeometryProvider) -> AcqResult<ExpandedAcquisition> {
    settings.validate()?;

    let positions = resolve_positions(settings, geometry)?;
    let channels = settings.channel_names();
    let num_time_points = settings.time.effective_points();
    let autofocus = settings.autofocus.enabled;

    let per_time_point: usize = positions.iter().map(|p| p.slices.len() * channels.len()).sum();
    let mut events = Vec::with_capacity(per_time_point.saturating_mul(num_time_points));
    for time_index in 0..num_time_points {
        for (position_index, plan) in positions.iter().enumerate() {
            for (slice_index, z) in plan.slices.iter().enumerate() {
                for (channel_index, channel) in channels.iter().enumerate() {
                    events.push(AcquisitionEvent {
                        time_index,
                        position_index,
                        slice_index,
                        channel_index,
                        channel: channel.clone(),
                        position: plan.position,
                        z: *z,
                        autofocus_pending: autofocus && slice_index == 0 && channel_index == 0,
                    });
                }
            }
        }
    }

    debug!(
        acquisition = %settings.name,
        mode = settings.space.label(),
        time_points = num_time_points,
        positions = positions.len(),
        events = events.len(),
        "Expanded acquisition"
    );

    Ok(ExpandedAcquisition {
        name: settings.name.clone(),
        interval: settings.time.interval_duration(),
        num_time_points,
        positions,
        channels,
        events,
        per_time_point,
    })
}

fn resolve_positions(settings: &AcquisitionSettings, geometry: &GeometryProvider) -> AcqResult<Vec<PositionPlan>> {
    let overlap = settings.tile_overlap;
    match settings.space {
        SpaceMode::None => Ok(vec![PositionPlan {
            position: None,
            slices: vec![None],
        }]),

        SpaceMode::Region2D { footprint } => Ok(tiles(geometry, &footprint, overlap)?
            .into_iter()
            .map(|t| PositionPlan {
                position: Some((t.x, t.y)),
                slices: vec![None],
            })
            .collect()),

        SpaceMode::SimpleZStack {
            footprint,
            z_start,
            z_end,
            z_step,
        } => {
            let slices: Vec<Option<f64>> = stack(z_start, z_end, z_step)?.into_iter().map(Some).collect();
            Ok(tiles(geometry, &footprint, overlap)?
                .into_iter()
                .map(|t| PositionPlan {
                    position: Some((t.x, t.y)),
                    slices: slices.clone(),
                })
                .collect())
        }

        SpaceMode::VolumeBetweenSurfaces {
            top,
            bottom,
            distance_above_top,
            distance_below_bottom,
            footprint_from,
            z_step,
        } => {
            let top_model = geometry.surface_model(top)?;
            let bottom_model = geometry.surface_model(bottom)?;
            let source = match footprint_from {
                FootprintSource::Top => &top_model,
                FootprintSource::Bottom => &bottom_model,
            };

            let mut plans = Vec::new();
            for t in surface_tiles(geometry, source, overlap)? {
                let bottom_z = bottom_model.interpolated_z(t.x, t.y) + distance_below_bottom;
                let top_z = top_model.interpolated_z(t.x, t.y) - distance_above_top;
                let slices = ascending(bottom_z, top_z, z_step)?;
                if slices.is_empty() {
                    debug!(x = t.x, y = t.y, bottom_z, top_z, "Tile has no slices between surfaces");
                    continue;
                }
                plans.push(PositionPlan {
                    position: Some((t.x, t.y)),
                    slices: slices.into_iter().map(Some).collect(),
                });
            }
            Ok(plans)
        }

        SpaceMode::FixedDistanceFromSurface {
            surface,
            distance_above,
            distance_below,
            z_step,
        } => {
            let model = geometry.surface_model(surface)?;
            let mut plans = Vec::new();
            for t in surface_tiles(geometry, &model, overlap)? {
                let center = model.interpolated_z(t.x, t.y);
                let slices = ascending(center - distance_below, center + distance_above, z_step)?;
                if slices.is_empty() {
                    continue;
                }
                plans.push(PositionPlan {
                    position: Some((t.x, t.y)),
                    slices: slices.into_iter().map(Some).collect(),
                });
            }
            Ok(plans)
        }
    }
}

fn tiles(geometry: &GeometryProvider, footprint: &Footprint, overlap: f64) -> AcqResult<Vec<TilePosition>> {
    let tiles = geometry.tiles_for(footprint, overlap)?;
    if tiles.is_empty() {
        return Err(AcqError::EmptyFootprint(geometry.footprint_name(footprint)?));
    }
    Ok(tiles)
}

/// Tiles of a surface snapshot already used for Z sampling.
fn surface_tiles(geometry: &GeometryProvider, model: &SurfaceModel, overlap: f64) -> AcqResult<Vec<TilePosition>> {
    let tiles = geometry.tiles_for_model(model, overlap)?;
    if tiles.is_empty() {
        return Err(AcqError::EmptyFootprint(model.name().to_string()));
    }
    Ok(tiles)
}

/// `start..=end` by `step` in the direction of `end`.
fn stack(start: f64, end: f64, step: f64) -> AcqResult<Vec<f64>> {
    if end >= start {
        ascending(start, end, step)
    } else {
        Ok(ascending(end, start, step)?.into_iter().map(|z| start - (z - end)).collect())
    }
}

/// `low, low + step, ...` up to `high`; empty when `low > high`.
fn ascending(low: f64, high: f64, step: f64) -> AcqResult<Vec<f64>> {
    if !(step.is_finite() && step > 0.0) {
        return Err(AcqError::NonPositiveZStep(step));
    }
    if !(low.is_finite() && high.is_finite()) {
        return Err(AcqError::Configuration(format!("z range [{}, {}] is not finite", low, high)));
    }
    if low > high + Z_EPS {
        return Ok(Vec::new());
    }
    let count = ((high - low) / step + Z_EPS).floor() as usize + 1;
    if count > MAX_SLICES {
        return Err(AcqError::Configuration(format!(
            "{} z slices exceed the limit of {}",
            count, MAX_SLICES
        )));
    }
    Ok((0..count).map(|i| low + i as f64 * step).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascending_includes_end() {
        assert_eq!(ascending(0.0, 2.0, 1.0).unwrap(), vec![0.0, 1.0, 2.0]);
        assert_eq!(ascending(0.0, 0.3, 0.1).unwrap().len(), 4);
        assert_eq!(ascending(0.0, 2.5, 1.0).unwrap(), vec![0.0, 1.0, 2.0]);
        assert_eq!(ascending(1.0, 1.0, 1.0).unwrap(), vec![1.0]);
        assert!(ascending(3.0, 1.0, 1.0).unwrap().is_empty());
    }

    #[test]
    fn descending_stack_walks_down() {
        assert_eq!(stack(2.0, 0.0, 1.0).unwrap(), vec![2.0, 1.0, 0.0]);
    }

    #[test]
    fn slice_bound() {
        assert!(ascending(0.0, 1.0e6, 1.0).is_err());
        assert!(matches!(ascending(0.0, 1.0, 0.0), Err(AcqError::NonPositiveZStep(_))));
    }
}
