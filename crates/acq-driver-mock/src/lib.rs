//! Mock Hardware Drivers for rust-acq
//!
//! Simulated microscope devices implementing the `acq-core` capability
//! traits, for tests and dry runs without hardware. All delays use
//! `tokio::time::sleep`, so paused-clock tests stay deterministic.
//!
//! # Available Mock Drivers
//!
//! - [`MockStage`] - XY stage with optional travel limits
//! - [`MockFocus`] - Z drive with optional travel limits
//! - [`MockPropertyControl`] - in-memory property table
//! - [`MockCamera`] - gradient test-pattern frames
//! - [`MockAutofocus`] - scripted focus corrections
//! - [`MemoryWriter`] - keeps saved frames in memory
//!
//! Every device records its calls into a shared [`HardwareLog`] and accepts
//! an [`ErrorConfig`] for failure injection.
//!
//! ```rust
//! use acq_core::capabilities::XyStage;
//! use acq_driver_mock::{MockHardware, TimingConfig};
//!
//! let mock = MockHardware::new(TimingConfig::instant());
//! let hardware = mock.hardware_set();
//! assert_eq!(hardware.stage.device_name(), "XYStage");
//! assert!(mock.log.is_empty());
//! ```

pub mod common;
mod memory_writer;
mod mock_autofocus;
mod mock_camera;
mod mock_properties;
mod mock_stage;

use acq_core::capabilities::HardwareSet;
use std::sync::Arc;

pub use common::errors::ops;
pub use common::{ErrorConfig, ErrorScenario, HardwareCall, HardwareLog, MockRng, TimingConfig};
pub use memory_writer::MemoryWriter;
pub use mock_autofocus::MockAutofocus;
pub use mock_camera::{test_pattern, MockCamera};
pub use mock_properties::MockPropertyControl;
pub use mock_stage::{MockFocus, MockStage, TravelLimits};

/// Device name of the default XY stage.
pub const STAGE_NAME: &str = "XYStage";
/// Device name of the default focus drive.
pub const FOCUS_NAME: &str = "ZStage";

/// A full set of mock devices sharing one [`HardwareLog`].
///
/// Fields are public so tests can swap in a device built with an
/// [`ErrorConfig`] before calling [`hardware_set`](Self::hardware_set).
#[derive(Debug, Clone)]
pub struct MockHardware {
    pub log: HardwareLog,
    pub stage: Arc<MockStage>,
    pub focus: Arc<MockFocus>,
    pub properties: Arc<MockPropertyControl>,
    pub camera: Arc<MockCamera>,
    pub autofocus: Arc<MockAutofocus>,
    pub writer: Arc<MemoryWriter>,
}

impl MockHardware {
    /// Default devices with the given latencies.
    pub fn new(timing: TimingConfig) -> Self {
        let log = HardwareLog::new();
        Self {
            stage: Arc::new(MockStage::new(STAGE_NAME, log.clone()).timing_config(timing)),
            focus: Arc::new(MockFocus::new(FOCUS_NAME, log.clone()).timing_config(timing)),
            properties: Arc::new(MockPropertyControl::new(log.clone()).timing_config(timing)),
            camera: Arc::new(MockCamera::new("Camera", 64, 64, log.clone()).timing_config(timing)),
            autofocus: Arc::new(MockAutofocus::new("Autofocus", log.clone())),
            writer: Arc::new(MemoryWriter::new(log.clone())),
            log,
        }
    }

    /// Replace the camera, keeping the shared log.
    pub fn with_camera(mut self, build: impl FnOnce(HardwareLog) -> MockCamera) -> Self {
        self.camera = Arc::new(build(self.log.clone()));
        self
    }

    /// Replace the stage, keeping the shared log.
    pub fn with_stage(mut self, build: impl FnOnce(HardwareLog) -> MockStage) -> Self {
        self.stage = Arc::new(build(self.log.clone()));
        self
    }

    /// Replace the focus drive, keeping the shared log.
    pub fn with_focus(mut self, build: impl FnOnce(HardwareLog) -> MockFocus) -> Self {
        self.focus = Arc::new(build(self.log.clone()));
        self
    }

    /// Replace the property table, keeping the shared log.
    pub fn with_properties(mut self, build: impl FnOnce(HardwareLog) -> MockPropertyControl) -> Self {
        self.properties = Arc::new(build(self.log.clone()));
        self
    }

    /// Replace the autofocus, keeping the shared log.
    pub fn with_autofocus(mut self, build: impl FnOnce(HardwareLog) -> MockAutofocus) -> Self {
        self.autofocus = Arc::new(build(self.log.clone()));
        self
    }

    /// Replace the writer, keeping the shared log.
    pub fn with_writer(mut self, build: impl FnOnce(HardwareLog) -> MemoryWriter) -> Self {
        self.writer = Arc::new(build(self.log.clone()));
        self
    }

    /// Capability view for the acquisition engine.
    pub fn hardware_set(&self) -> HardwareSet {
        HardwareSet {
            stage: self.stage.clone(),
            focus: self.focus.clone(),
            properties: self.properties.clone(),
            camera: self.camera.clone(),
            autofocus: self.autofocus.clone(),
            writer: self.writer.clone(),
        }
    }
}

impl Default for MockHardware {
    fn default() -> Self {
        Self::new(TimingConfig::instant())
    }
}
