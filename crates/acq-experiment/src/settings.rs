//! Acquisition settings - the declarative description of one acquisition.
//!
//! Settings are plain data. They reference surfaces and regions by id and are
//! resolved against the [`GeometryProvider`](acq_geometry::GeometryProvider)
//! only when [`expand`](crate::expansion::expand) runs.
//!
//! # Example
//!
//! ```rust
//! use acq_experiment::settings::{AcquisitionSettings, SpaceMode, TimeSpec, TimeUnit};
//! use acq_geometry::{Footprint, RegionId};
//!
//! let settings = AcquisitionSettings::new("zstack")
//!     .with_time(TimeSpec::points(3, 30.0, TimeUnit::Seconds))
//!     .with_space(SpaceMode::SimpleZStack {
//!         footprint: Footprint::Region(RegionId(1)),
//!         z_start: 0.0,
//!         z_end: 10.0,
//!         z_step: 2.0,
//!     });
//! assert!(settings.validate().is_ok());
//! ```

use acq_core::data::{PropertyId, PropertyValue};
use acq_core::error::{AcqError, AcqResult};
use acq_geometry::footprint::valid_overlap;
use acq_geometry::{Footprint, SurfaceId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Version of the persisted settings field set.
pub const SETTINGS_VERSION: u32 = 1;

/// Upper bound on Z slices per position.
pub const MAX_SLICES: usize = 10_000;

/// Name of the channel used when a settings has no channel list.
pub const DEFAULT_CHANNEL: &str = "Default";

/// Unit of a time-lapse interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    #[serde(alias = "ms")]
    Milliseconds,
    #[default]
    #[serde(alias = "s")]
    Seconds,
    #[serde(alias = "min")]
    Minutes,
}

impl TimeUnit {
    fn to_seconds(self, value: f64) -> f64 {
        match self {
            TimeUnit::Milliseconds => value / 1000.0,
            TimeUnit::Seconds => value,
            TimeUnit::Minutes => value * 60.0,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeUnit::Milliseconds => write!(f, "ms"),
            TimeUnit::Seconds => write!(f, "s"),
            TimeUnit::Minutes => write!(f, "min"),
        }
    }
}

/// Time-lapse specification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSpec {
    pub enabled: bool,
    /// Number of time points, at least 1
    pub num_points: usize,
    /// Interval between time point starts, in `unit`
    pub interval: f64,
    #[serde(default)]
    pub unit: TimeUnit,
}

impl Default for TimeSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            num_points: 1,
            interval: 0.0,
            unit: TimeUnit::Seconds,
        }
    }
}

impl TimeSpec {
    /// Enabled time-lapse of `num_points` points.
    pub fn points(num_points: usize, interval: f64, unit: TimeUnit) -> Self {
        Self {
            enabled: true,
            num_points,
            interval,
            unit,
        }
    }

    /// Time points actually acquired: one when time-lapse is disabled.
    pub fn effective_points(&self) -> usize {
        if self.enabled {
            self.num_points
        } else {
            1
        }
    }

    /// Interval as a duration; zero when time-lapse is disabled. Intervals
    /// too long for a [`Duration`] saturate to [`Duration::MAX`], which
    /// [`validate`](AcquisitionSettings::validate) rejects.
    pub fn interval_duration(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self.unit.to_seconds(self.interval).max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Whether two specs can be interleaved in one parallel group.
    pub fn compatible_with(&self, other: &TimeSpec) -> bool {
        self.enabled == other.enabled && self.interval_duration() == other.interval_duration()
    }

    fn validate(&self) -> AcqResult<()> {
        if self.num_points == 0 {
            return Err(AcqError::Configuration("time spec needs at least one time point".into()));
        }
        if !self.interval.is_finite() || self.interval < 0.0 {
            return Err(AcqError::Configuration(format!(
                "time interval must be >= 0 (got {})",
                self.interval
            )));
        }
        if Duration::try_from_secs_f64(self.unit.to_seconds(self.interval)).is_err() {
            return Err(AcqError::Configuration(format!(
                "time interval {} {} is too long",
                self.interval, self.unit
            )));
        }
        Ok(())
    }
}

/// Which surface supplies the tiles of a volume acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FootprintSource {
    #[default]
    Top,
    Bottom,
}

/// Z strategy of an acquisition. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SpaceMode {
    /// No stage motion: one event per channel per time point.
    #[default]
    None,
    /// Tiles of a footprint at the current Z.
    #[serde(rename = "region_2d")]
    Region2D { footprint: Footprint },
    /// `z_start..=z_end` by `z_step` at every tile.
    SimpleZStack {
        footprint: Footprint,
        z_start: f64,
        z_end: f64,
        z_step: f64,
    },
    /// Slices between two surfaces, evaluated per tile.
    VolumeBetweenSurfaces {
        top: SurfaceId,
        bottom: SurfaceId,
        distance_above_top: f64,
        distance_below_bottom: f64,
        #[serde(default)]
        footprint_from: FootprintSource,
        z_step: f64,
    },
    /// Slices around one surface, evaluated per tile.
    FixedDistanceFromSurface {
        surface: SurfaceId,
        distance_above: f64,
        distance_below: f64,
        z_step: f64,
    },
}

impl SpaceMode {
    /// Z step when the mode has a Z dimension.
    pub fn z_step(&self) -> Option<f64> {
        match self {
            SpaceMode::None | SpaceMode::Region2D { .. } => None,
            SpaceMode::SimpleZStack { z_step, .. }
            | SpaceMode::VolumeBetweenSurfaces { z_step, .. }
            | SpaceMode::FixedDistanceFromSurface { z_step, .. } => Some(*z_step),
        }
    }

    /// Short label for logs and documents.
    pub fn label(&self) -> &'static str {
        match self {
            SpaceMode::None => "none",
            SpaceMode::Region2D { .. } => "2d",
            SpaceMode::SimpleZStack { .. } => "simple_z_stack",
            SpaceMode::VolumeBetweenSurfaces { .. } => "volume_between_surfaces",
            SpaceMode::FixedDistanceFromSurface { .. } => "fixed_distance_from_surface",
        }
    }
}

/// One property assignment applied when a channel becomes active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySetting {
    pub property: PropertyId,
    pub value: PropertyValue,
}

/// A named group of property assignments (filter, light source, exposure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    #[serde(default)]
    pub settings: Vec<PropertySetting>,
}

impl Channel {
    /// Channel without property assignments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: Vec::new(),
        }
    }

    /// Add a property assignment.
    pub fn with_setting(mut self, property: PropertyId, value: impl Into<PropertyValue>) -> Self {
        self.settings.push(PropertySetting {
            property,
            value: value.into(),
        });
        self
    }
}

/// Autofocus behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutofocusSpec {
    pub enabled: bool,
    /// Channel activated while measuring
    pub channel: String,
    /// Device whose `Position` property holds the autofocus Z offset
    pub z_device: String,
    /// Largest accepted correction (µm)
    pub max_displacement: f64,
    /// Fixed `Position` applied to `z_device` before the first time point
    #[serde(default)]
    pub initial_position: Option<f64>,
}

impl Default for AutofocusSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: String::new(),
            z_device: String::new(),
            max_displacement: 10.0,
            initial_position: None,
        }
    }
}

/// Everything needed to expand and run one acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    pub name: String,
    /// Saving location handed to the image writer
    #[serde(default)]
    pub dir: PathBuf,
    #[serde(default)]
    pub time: TimeSpec,
    #[serde(default)]
    pub space: SpaceMode,
    /// Tile overlap in percent, `[0, 99)`
    #[serde(default)]
    pub tile_overlap: f64,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub autofocus: AutofocusSpec,
}

#[derive(Serialize, Deserialize)]
struct SettingsBlob {
    version: u32,
    settings: AcquisitionSettings,
}

impl AcquisitionSettings {
    /// Settings with no time-lapse, no stage motion and the default channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: PathBuf::new(),
            time: TimeSpec::default(),
            space: SpaceMode::None,
            tile_overlap: 0.0,
            channels: Vec::new(),
            autofocus: AutofocusSpec::default(),
        }
    }

    pub fn with_time(mut self, time: TimeSpec) -> Self {
        self.time = time;
        self
    }

    pub fn with_space(mut self, space: SpaceMode) -> Self {
        self.space = space;
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn with_autofocus(mut self, autofocus: AutofocusSpec) -> Self {
        self.autofocus = autofocus;
        self
    }

    pub fn with_overlap(mut self, overlap_percent: f64) -> Self {
        self.tile_overlap = overlap_percent;
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Channel names in acquisition order; the implicit default channel when
    /// the list is empty.
    pub fn channel_names(&self) -> Vec<String> {
        if self.channels.is_empty() {
            vec![DEFAULT_CHANNEL.to_string()]
        } else {
            self.channels.iter().map(|c| c.name.clone()).collect()
        }
    }

    /// Look up a channel by name.
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Checks that do not need the geometry store.
    pub fn validate(&self) -> AcqResult<()> {
        self.time.validate()?;

        if let Some(step) = self.space.z_step() {
            if !(step.is_finite() && step > 0.0) {
                return Err(AcqError::NonPositiveZStep(step));
            }
        }

        if !matches!(self.space, SpaceMode::None) && !valid_overlap(self.tile_overlap) {
            return Err(AcqError::Configuration(format!(
                "tile overlap must be in [0, 99) percent (got {})",
                self.tile_overlap
            )));
        }

        for (i, channel) in self.channels.iter().enumerate() {
            if self.channels[..i].iter().any(|c| c.name == channel.name) {
                return Err(AcqError::Configuration(format!(
                    "duplicate channel name '{}'",
                    channel.name
                )));
            }
        }

        if self.autofocus.enabled {
            let af = &self.autofocus;
            if af.channel.is_empty() {
                return Err(AcqError::Configuration("autofocus channel is not set".into()));
            }
            if !(af.max_displacement.is_finite() && af.max_displacement > 0.0) {
                return Err(AcqError::Configuration(format!(
                    "autofocus max displacement must be > 0 (got {})",
                    af.max_displacement
                )));
            }
            if af.initial_position.is_some() && af.z_device.is_empty() {
                return Err(AcqError::Configuration(
                    "autofocus initial position needs a z device".into(),
                ));
            }
        }
        Ok(())
    }

    /// Serialize into a versioned JSON blob.
    pub fn to_blob(&self) -> AcqResult<String> {
        let blob = SettingsBlob {
            version: SETTINGS_VERSION,
            settings: self.clone(),
        };
        Ok(serde_json::to_string_pretty(&blob)?)
    }

    /// Restore settings from a blob written by [`to_blob`](Self::to_blob).
    pub fn from_blob(blob: &str) -> AcqResult<Self> {
        let parsed: SettingsBlob = serde_json::from_str(blob)?;
        if parsed.version != SETTINGS_VERSION {
            return Err(AcqError::Persistence(format!(
                "unsupported settings version {} (expected {})",
                parsed.version, SETTINGS_VERSION
            )));
        }
        Ok(parsed.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acq_geometry::RegionId;

    fn zstack(step: f64) -> AcquisitionSettings {
        AcquisitionSettings::new("stack").with_space(SpaceMode::SimpleZStack {
            footprint: Footprint::Region(RegionId(1)),
            z_start: 0.0,
            z_end: 10.0,
            z_step: step,
        })
    }

    #[test]
    fn z_step_must_be_positive() {
        assert!(zstack(1.0).validate().is_ok());
        assert!(matches!(zstack(0.0).validate(), Err(AcqError::NonPositiveZStep(_))));
        assert!(matches!(zstack(-2.0).validate(), Err(AcqError::NonPositiveZStep(_))));
        assert!(matches!(zstack(f64::NAN).validate(), Err(AcqError::NonPositiveZStep(_))));
    }

    #[test]
    fn interval_units() {
        assert_eq!(
            TimeSpec::points(2, 1500.0, TimeUnit::Milliseconds).interval_duration(),
            Duration::from_millis(1500)
        );
        assert_eq!(
            TimeSpec::points(2, 2.0, TimeUnit::Minutes).interval_duration(),
            Duration::from_secs(120)
        );
        let disabled = TimeSpec {
            enabled: false,
            ..TimeSpec::points(5, 3.0, TimeUnit::Seconds)
        };
        assert_eq!(disabled.effective_points(), 1);
        assert_eq!(disabled.interval_duration(), Duration::ZERO);
    }

    #[test]
    fn time_compatibility() {
        let a = TimeSpec::points(3, 60.0, TimeUnit::Seconds);
        let b = TimeSpec::points(5, 1.0, TimeUnit::Minutes);
        let c = TimeSpec::points(3, 30.0, TimeUnit::Seconds);
        assert!(a.compatible_with(&b));
        assert!(!a.compatible_with(&c));
        assert!(!a.compatible_with(&TimeSpec::default()));
    }

    #[test]
    fn oversized_interval_rejected() {
        let huge = TimeSpec::points(2, 1.0e20, TimeUnit::Seconds);
        let settings = AcquisitionSettings::new("huge").with_time(huge);
        assert!(matches!(settings.validate(), Err(AcqError::Configuration(_))));
        assert_eq!(huge.interval_duration(), Duration::MAX);

        let minutes = TimeSpec::points(2, 1.0e18, TimeUnit::Minutes);
        assert!(AcquisitionSettings::new("minutes").with_time(minutes).validate().is_err());
    }

    #[test]
    fn unvalidated_intervals_compare_without_panicking() {
        let infinite = TimeSpec::points(2, f64::INFINITY, TimeUnit::Seconds);
        let nan = TimeSpec::points(2, f64::NAN, TimeUnit::Seconds);
        let normal = TimeSpec::points(2, 5.0, TimeUnit::Seconds);
        assert!(!infinite.compatible_with(&normal));
        assert!(!normal.compatible_with(&infinite));
        assert!(!nan.compatible_with(&normal));
    }

    #[test]
    fn autofocus_checks() {
        let mut settings = AcquisitionSettings::new("af");
        settings.autofocus.enabled = true;
        assert!(settings.validate().is_err());
        settings.autofocus.channel = "DAPI".into();
        assert!(settings.validate().is_ok());
        settings.autofocus.initial_position = Some(5.0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn duplicate_channels_rejected() {
        let settings = AcquisitionSettings::new("dup")
            .with_channel(Channel::new("GFP"))
            .with_channel(Channel::new("GFP"));
        assert!(settings.validate().is_err());
        assert_eq!(AcquisitionSettings::new("x").channel_names(), vec![DEFAULT_CHANNEL]);
    }

    #[test]
    fn blob_round_trip_and_version_check() {
        let settings = zstack(2.5)
            .with_channel(Channel::new("GFP").with_setting(PropertyId::new("Filter", "Label"), "488"))
            .with_dir("/data/run1");
        let blob = settings.to_blob().unwrap();
        assert_eq!(AcquisitionSettings::from_blob(&blob).unwrap(), settings);

        let bumped = blob.replace("\"version\": 1", "\"version\": 2");
        assert!(matches!(
            AcquisitionSettings::from_blob(&bumped),
            Err(AcqError::Persistence(_))
        ));
    }
}
