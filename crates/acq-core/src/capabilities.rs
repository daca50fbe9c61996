//! Hardware Capabilities
//!
//! The acquisition engine never talks to devices directly. It drives a small set
//! of fine-grained capability traits, one per concern:
//!
//! - [`XyStage`] - lateral sample positioning
//! - [`FocusDrive`] - axial (Z) positioning
//! - [`PropertyControl`] - generic device properties (channel presets, lasers, paired slaves)
//! - [`Camera`] - image capture
//! - [`Autofocus`] - focus-drift measurement
//! - [`ImageWriter`] - persistence of captured frames
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! All calls block only the acquisition worker task. Implementations must
//! return only once the command has completed (motion settled, frame read out)
//! so that an abort between two calls always leaves the hardware idle.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn snap_at<S, F, C>(stage: &S, focus: &F, camera: &C, x: f64, y: f64, z: f64) -> Result<Frame>
//! where
//!     S: XyStage,
//!     F: FocusDrive,
//!     C: Camera,
//! {
//!     stage.move_xy(x, y).await?;
//!     focus.move_z(z).await?;
//!     camera.capture().await
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::data::{Frame, ImageCoordinates, PropertyId, PropertyValue};

/// Capability: lateral stage motion.
#[async_trait]
pub trait XyStage: Send + Sync {
    /// Device label used for logging and for covariant master lookups.
    fn device_name(&self) -> &str;

    /// Move to an absolute XY position (µm) and wait until settled.
    async fn move_xy(&self, x: f64, y: f64) -> Result<()>;

    /// Current XY position (µm).
    async fn position(&self) -> Result<(f64, f64)>;
}

/// Capability: focus (Z) motion.
#[async_trait]
pub trait FocusDrive: Send + Sync {
    /// Device label used for logging and for covariant master lookups.
    fn device_name(&self) -> &str;

    /// Move to an absolute Z position (µm) and wait until settled.
    async fn move_z(&self, z: f64) -> Result<()>;

    /// Current Z position (µm).
    async fn position(&self) -> Result<f64>;
}

/// Capability: generic device properties.
#[async_trait]
pub trait PropertyControl: Send + Sync {
    /// Set a property and wait for the device to apply it.
    async fn set_property(&self, property: &PropertyId, value: &PropertyValue) -> Result<()>;

    /// Read the current value of a property.
    async fn get_property(&self, property: &PropertyId) -> Result<PropertyValue>;
}

/// Capability: image capture.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Expose and read out one frame.
    async fn capture(&self) -> Result<Frame>;
}

/// Capability: autofocus measurement.
#[async_trait]
pub trait Autofocus: Send + Sync {
    /// Measure the focus correction (µm) using the named channel. A positive
    /// value means the sample is further along +Z than expected.
    async fn measure(&self, channel: &str) -> Result<f64>;
}

/// Capability: image persistence.
#[async_trait]
pub trait ImageWriter: Send + Sync {
    /// Persist one frame at the given coordinates.
    async fn save(&self, frame: &Frame, coordinates: &ImageCoordinates) -> Result<()>;
}

/// The set of devices one acquisition drives.
///
/// Cloning is cheap; every device is shared behind an `Arc`.
#[derive(Clone)]
pub struct HardwareSet {
    pub stage: Arc<dyn XyStage>,
    pub focus: Arc<dyn FocusDrive>,
    pub properties: Arc<dyn PropertyControl>,
    pub camera: Arc<dyn Camera>,
    pub autofocus: Arc<dyn Autofocus>,
    pub writer: Arc<dyn ImageWriter>,
}

impl std::fmt::Debug for HardwareSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareSet")
            .field("stage", &self.stage.device_name())
            .field("focus", &self.focus.device_name())
            .finish_non_exhaustive()
    }
}
