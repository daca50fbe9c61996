//! Mock XY stage and focus drive.

use acq_core::capabilities::{FocusDrive, XyStage};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::common::errors::ops;
use crate::common::{ErrorConfig, HardwareCall, HardwareLog, TimingConfig};

/// Travel limits in µm, inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelLimits {
    pub min: f64,
    pub max: f64,
}

impl TravelLimits {
    /// Limits spanning `[min, max]`.
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn check(&self, axis: &str, target: f64) -> Result<()> {
        if target < self.min || target > self.max {
            return Err(anyhow!(
                "{} position {:.2}µm exceeds limits [{:.2}, {:.2}]µm",
                axis,
                target,
                self.min,
                self.max
            ));
        }
        Ok(())
    }
}

/// Simulated motorized XY stage.
#[derive(Debug)]
pub struct MockStage {
    name: String,
    position: Mutex<(f64, f64)>,
    limits: Option<TravelLimits>,
    timing: TimingConfig,
    errors: ErrorConfig,
    log: HardwareLog,
}

impl MockStage {
    /// Stage at the origin recording into `log`.
    pub fn new(name: impl Into<String>, log: HardwareLog) -> Self {
        Self {
            name: name.into(),
            position: Mutex::new((0.0, 0.0)),
            limits: None,
            timing: TimingConfig::default(),
            errors: ErrorConfig::none(),
            log,
        }
    }

    /// Reject moves outside `limits` on either axis.
    pub fn limits(mut self, limits: TravelLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Apply simulated settling time.
    pub fn timing_config(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Inject failures.
    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }
}

#[async_trait]
impl XyStage for MockStage {
    fn device_name(&self) -> &str {
        &self.name
    }

    async fn move_xy(&self, x: f64, y: f64) -> Result<()> {
        self.log.record(HardwareCall::MoveXy { x, y });
        self.errors.check_operation(&self.name, ops::MOVE_XY)?;
        if let Some(limits) = &self.limits {
            limits.check("X", x)?;
            limits.check("Y", y)?;
        }
        self.timing.settle().await;
        *self.position.lock() = (x, y);
        tracing::trace!(stage = %self.name, x, y, "Mock stage moved");
        Ok(())
    }

    async fn position(&self) -> Result<(f64, f64)> {
        Ok(*self.position.lock())
    }
}

/// Simulated focus drive.
#[derive(Debug)]
pub struct MockFocus {
    name: String,
    position: Mutex<f64>,
    limits: Option<TravelLimits>,
    timing: TimingConfig,
    errors: ErrorConfig,
    log: HardwareLog,
}

impl MockFocus {
    /// Focus at Z = 0 recording into `log`.
    pub fn new(name: impl Into<String>, log: HardwareLog) -> Self {
        Self {
            name: name.into(),
            position: Mutex::new(0.0),
            limits: None,
            timing: TimingConfig::default(),
            errors: ErrorConfig::none(),
            log,
        }
    }

    /// Reject moves outside `limits`.
    pub fn limits(mut self, limits: TravelLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Apply simulated settling time.
    pub fn timing_config(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Inject failures.
    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }
}

#[async_trait]
impl FocusDrive for MockFocus {
    fn device_name(&self) -> &str {
        &self.name
    }

    async fn move_z(&self, z: f64) -> Result<()> {
        self.log.record(HardwareCall::MoveZ { z });
        self.errors.check_operation(&self.name, ops::MOVE_Z)?;
        if let Some(limits) = &self.limits {
            limits.check("Z", z)?;
        }
        self.timing.settle().await;
        *self.position.lock() = z;
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        Ok(*self.position.lock())
    }
}
