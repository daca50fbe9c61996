//! Engine configuration using Figment
//!
//! Configuration is loaded from:
//! 1. Library defaults
//! 2. An optional TOML file (e.g. `config/acq.toml`)
//! 3. Environment variables (prefixed with `RUST_ACQ_`)
//!
//! # Example
//! ```no_run
//! use acq_core::config::EngineConfig;
//!
//! let config = EngineConfig::load_from("config/acq.toml")?;
//! println!("capture backoff: {} ms", config.engine.capture_retry_backoff_ms);
//! # Ok::<(), acq_core::error::AcqError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AcqError, AcqResult};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Acquisition engine tuning
    #[serde(default)]
    pub engine: EngineSettings,
    /// Camera field of view used for tiling
    #[serde(default)]
    pub tiling: TilingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "rust-acq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Acquisition engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Pause before the single capture/motion retry (milliseconds)
    #[serde(default = "default_retry_backoff")]
    pub capture_retry_backoff_ms: u64,
    /// Capacity of the run document broadcast channel
    #[serde(default = "default_document_capacity")]
    pub document_channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            capture_retry_backoff_ms: default_retry_backoff(),
            document_channel_capacity: default_document_capacity(),
        }
    }
}

impl EngineSettings {
    /// Retry backoff as a `Duration`.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.capture_retry_backoff_ms)
    }
}

/// Camera field of view and interpolation defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TilingConfig {
    /// Width of one camera tile in µm
    #[serde(default = "default_tile_size")]
    pub tile_width_um: f64,
    /// Height of one camera tile in µm
    #[serde(default = "default_tile_size")]
    pub tile_height_um: f64,
    /// Inverse-distance power for new surfaces
    #[serde(default = "default_idw_power")]
    pub interpolation_power: f64,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_width_um: default_tile_size(),
            tile_height_um: default_tile_size(),
            interpolation_power: default_idw_power(),
        }
    }
}

// Default value functions
fn default_retry_backoff() -> u64 {
    100
}

fn default_document_capacity() -> usize {
    1024
}

fn default_tile_size() -> f64 {
    500.0
}

fn default_idw_power() -> f64 {
    2.0
}

impl EngineConfig {
    /// Load defaults overridden by `RUST_ACQ_` environment variables only.
    pub fn load() -> AcqResult<Self> {
        Self::figment()
            .merge(Env::prefixed("RUST_ACQ_").split("__"))
            .extract()
            .map_err(|e| AcqError::Figment(Box::new(e)))
            .and_then(Self::validated)
    }

    /// Load from a TOML file, then environment variables.
    ///
    /// Environment variables use `__` as the section separator, e.g.
    /// `RUST_ACQ_ENGINE__CAPTURE_RETRY_BACKOFF_MS=250`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AcqResult<Self> {
        Self::figment()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("RUST_ACQ_").split("__"))
            .extract()
            .map_err(|e| AcqError::Figment(Box::new(e)))
            .and_then(Self::validated)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(EngineConfig::default()))
    }

    fn validated(self) -> AcqResult<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AcqResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(AcqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !(self.tiling.tile_width_um > 0.0 && self.tiling.tile_height_um > 0.0) {
            return Err(AcqError::Configuration(format!(
                "Tile size must be positive (got {} x {} µm)",
                self.tiling.tile_width_um, self.tiling.tile_height_um
            )));
        }

        if !(self.tiling.interpolation_power > 0.0) {
            return Err(AcqError::Configuration(format!(
                "interpolation_power must be positive (got {})",
                self.tiling.interpolation_power
            )));
        }

        if self.engine.document_channel_capacity == 0 {
            return Err(AcqError::Configuration(
                "document_channel_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
