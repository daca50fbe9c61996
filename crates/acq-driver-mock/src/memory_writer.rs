//! Image writer keeping frames in memory.

use acq_core::capabilities::ImageWriter;
use acq_core::data::{Frame, ImageCoordinates};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::common::errors::ops;
use crate::common::{ErrorConfig, HardwareCall, HardwareLog};

/// Stores every saved frame with its coordinates.
#[derive(Debug)]
pub struct MemoryWriter {
    images: Mutex<Vec<(ImageCoordinates, Frame)>>,
    errors: ErrorConfig,
    log: HardwareLog,
}

impl MemoryWriter {
    /// Empty writer recording into `log`.
    pub fn new(log: HardwareLog) -> Self {
        Self {
            images: Mutex::new(Vec::new()),
            errors: ErrorConfig::none(),
            log,
        }
    }

    /// Inject failures.
    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Coordinates of the stored images, in save order.
    pub fn coordinates(&self) -> Vec<ImageCoordinates> {
        self.images.lock().iter().map(|(c, _)| c.clone()).collect()
    }

    /// Number of stored images.
    pub fn len(&self) -> usize {
        self.images.lock().len()
    }

    /// Whether nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.images.lock().is_empty()
    }
}

#[async_trait]
impl ImageWriter for MemoryWriter {
    async fn save(&self, frame: &Frame, coordinates: &ImageCoordinates) -> Result<()> {
        self.log.record(HardwareCall::Save {
            coordinates: coordinates.clone(),
        });
        self.errors.check_operation("MemoryWriter", ops::SAVE)?;
        self.images.lock().push((coordinates.clone(), frame.clone()));
        Ok(())
    }
}
