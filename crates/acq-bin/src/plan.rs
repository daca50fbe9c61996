//! Acquisition plan files.
//!
//! A plan is a TOML document naming surfaces, regions, covariant pairings and
//! the ordered acquisitions to run. Acquisitions refer to surfaces and regions
//! by name; [`PlanFile::build`] resolves the names into a [`Session`] holding
//! the geometry store, the pairing store and the scheduler.
//!
//! ```toml
//! [[regions]]
//! name = "grid"
//! center = [0.0, 0.0]
//! rows = 2
//! columns = 2
//!
//! [[acquisitions]]
//! name = "overview"
//! space = { mode = "region_2d", footprint = { region = "grid" } }
//! ```
//!
//! Consecutive acquisitions with the same `group` label run as one parallel
//! group.

use acq_core::config::TilingConfig;
use acq_core::data::PropertyId;
use acq_experiment::{
    AcquisitionSettings, AutofocusSpec, Channel, FootprintSource, MultiAcquisitionScheduler, SpaceMode, TimeSpec,
};
use acq_geometry::{Footprint, GeometryProvider, InterpolationMethod, Point2, Point3, Region, SurfaceId};
use acq_pairing::{CovariantPairing, CovariantSource, PairingStore, SurfaceDataKind};
use anyhow::{bail, Context, Result};
use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct PlanFile {
    #[serde(default)]
    pub surfaces: Vec<PlanSurface>,
    #[serde(default)]
    pub regions: Vec<PlanRegion>,
    #[serde(default)]
    pub pairings: Vec<PlanPairing>,
    pub acquisitions: Vec<PlanAcquisition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanSurface {
    pub name: String,
    #[serde(default)]
    pub method: InterpolationMethod,
    /// `[x, y, z]` control points
    pub points: Vec<[f64; 3]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanRegion {
    pub name: String,
    pub center: [f64; 2],
    pub rows: usize,
    pub columns: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanPairing {
    pub master: PlanMaster,
    pub slave: PropertyId,
    /// `[master, slave]` control points
    #[serde(default)]
    pub points: Vec<[f64; 2]>,
    #[serde(default = "enabled")]
    pub active: bool,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum PlanMaster {
    Property { property: PropertyId },
    SurfaceData { surface: String, kind: SurfaceDataKind },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanFootprint {
    Region(String),
    Surface(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PlanSpace {
    #[default]
    None,
    #[serde(rename = "region_2d")]
    Region2D { footprint: PlanFootprint },
    SimpleZStack {
        footprint: PlanFootprint,
        z_start: f64,
        z_end: f64,
        z_step: f64,
    },
    VolumeBetweenSurfaces {
        top: String,
        bottom: String,
        distance_above_top: f64,
        distance_below_bottom: f64,
        #[serde(default)]
        footprint_from: FootprintSource,
        z_step: f64,
    },
    FixedDistanceFromSurface {
        surface: String,
        distance_above: f64,
        distance_below: f64,
        z_step: f64,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanAcquisition {
    pub name: String,
    /// Parallel group label
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub dir: PathBuf,
    #[serde(default)]
    pub time: TimeSpec,
    #[serde(default)]
    pub space: PlanSpace,
    #[serde(default)]
    pub tile_overlap: f64,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub autofocus: AutofocusSpec,
}

/// Stores and schedule built from a plan.
pub struct Session {
    pub geometry: Arc<GeometryProvider>,
    pub pairings: Arc<PairingStore>,
    pub scheduler: MultiAcquisitionScheduler,
}

impl PlanFile {
    /// Load a plan from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Figment::new()
            .merge(Toml::file(path))
            .extract()
            .with_context(|| format!("reading plan {}", path.display()))
    }

    /// Parse a plan from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        Figment::new()
            .merge(Toml::string(text))
            .extract()
            .context("parsing plan")
    }

    /// Populate fresh stores and a scheduler.
    pub fn build(&self, tiling: TilingConfig) -> Result<Session> {
        if self.acquisitions.is_empty() {
            bail!("plan has no acquisitions");
        }
        let geometry = Arc::new(GeometryProvider::new(tiling));

        let mut surfaces: HashMap<&str, SurfaceId> = HashMap::new();
        for plan in &self.surfaces {
            let id = geometry.add_surface(plan.name.as_str());
            geometry.set_method(id, plan.method)?;
            for [x, y, z] in &plan.points {
                geometry.add_point(id, Point3::new(*x, *y, *z))?;
            }
            if surfaces.insert(plan.name.as_str(), id).is_some() {
                bail!("surface '{}' is defined twice", plan.name);
            }
            debug!(surface = %plan.name, points = plan.points.len(), "Surface loaded");
        }

        let mut regions = HashMap::new();
        for plan in &self.regions {
            let [x, y] = plan.center;
            let id = geometry.add_region(Region::new(plan.name.as_str(), Point2::new(x, y), plan.rows, plan.columns));
            if regions.insert(plan.name.as_str(), id).is_some() {
                bail!("region '{}' is defined twice", plan.name);
            }
        }

        let surface = |name: &str| -> Result<SurfaceId> {
            surfaces
                .get(name)
                .copied()
                .with_context(|| format!("unknown surface '{}'", name))
        };
        let footprint = |f: &PlanFootprint| -> Result<Footprint> {
            match f {
                PlanFootprint::Region(name) => regions
                    .get(name.as_str())
                    .copied()
                    .map(Footprint::Region)
                    .with_context(|| format!("unknown region '{}'", name)),
                PlanFootprint::Surface(name) => surface(name).map(Footprint::Surface),
            }
        };

        let pairings = Arc::new(PairingStore::new());
        for plan in &self.pairings {
            let master = match &plan.master {
                PlanMaster::Property { property } => CovariantSource::property(property.clone()),
                PlanMaster::SurfaceData { surface: name, kind } => CovariantSource::SurfaceData {
                    surface: surface(name)?,
                    kind: *kind,
                },
            };
            let mut pairing = CovariantPairing::new(master, plan.slave.clone());
            for [m, s] in &plan.points {
                pairing.add_control_point(*m, *s)?;
            }
            pairing.active = plan.active;
            pairings.add(pairing);
        }

        let mut settings = Vec::with_capacity(self.acquisitions.len());
        for plan in &self.acquisitions {
            let space = match &plan.space {
                PlanSpace::None => SpaceMode::None,
                PlanSpace::Region2D { footprint: f } => SpaceMode::Region2D { footprint: footprint(f)? },
                PlanSpace::SimpleZStack {
                    footprint: f,
                    z_start,
                    z_end,
                    z_step,
                } => SpaceMode::SimpleZStack {
                    footprint: footprint(f)?,
                    z_start: *z_start,
                    z_end: *z_end,
                    z_step: *z_step,
                },
                PlanSpace::VolumeBetweenSurfaces {
                    top,
                    bottom,
                    distance_above_top,
                    distance_below_bottom,
                    footprint_from,
                    z_step,
                } => SpaceMode::VolumeBetweenSurfaces {
                    top: surface(top)?,
                    bottom: surface(bottom)?,
                    distance_above_top: *distance_above_top,
                    distance_below_bottom: *distance_below_bottom,
                    footprint_from: *footprint_from,
                    z_step: *z_step,
                },
                PlanSpace::FixedDistanceFromSurface {
                    surface: name,
                    distance_above,
                    distance_below,
                    z_step,
                } => SpaceMode::FixedDistanceFromSurface {
                    surface: surface(name)?,
                    distance_above: *distance_above,
                    distance_below: *distance_below,
                    z_step: *z_step,
                },
            };
            let mut acquisition = AcquisitionSettings::new(plan.name.as_str())
                .with_time(plan.time)
                .with_space(space)
                .with_overlap(plan.tile_overlap)
                .with_dir(plan.dir.clone())
                .with_autofocus(plan.autofocus.clone());
            acquisition.channels = plan.channels.clone();
            settings.push(acquisition);
        }

        let scheduler = MultiAcquisitionScheduler::with_entries(settings);
        {
            let _batch = scheduler.batch();
            let mut seen: Vec<&str> = Vec::new();
            for (index, pair) in self.acquisitions.windows(2).enumerate() {
                let (above, below) = (&pair[0], &pair[1]);
                if let Some(label) = below.group.as_deref() {
                    if above.group.as_deref() == Some(label) {
                        scheduler
                            .add_to_parallel_grouping(index + 1)
                            .with_context(|| format!("grouping '{}' into '{}'", below.name, label))?;
                    } else if seen.contains(&label) {
                        bail!("members of group '{}' must be listed consecutively", label);
                    }
                }
                if let Some(label) = above.group.as_deref() {
                    seen.push(label);
                }
            }
        }

        info!(
            surfaces = self.surfaces.len(),
            regions = self.regions.len(),
            pairings = pairings.len(),
            acquisitions = scheduler.len(),
            "Plan loaded"
        );
        Ok(Session {
            geometry,
            pairings,
            scheduler,
        })
    }
}
