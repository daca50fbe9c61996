//! Mock camera producing gradient test frames.

use acq_core::capabilities::Camera;
use acq_core::data::Frame;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::errors::ops;
use crate::common::{ErrorConfig, HardwareCall, HardwareLog, TimingConfig};

/// Simulated camera.
#[derive(Debug)]
pub struct MockCamera {
    name: String,
    width: u32,
    height: u32,
    frame_count: AtomicU64,
    timing: TimingConfig,
    errors: ErrorConfig,
    log: HardwareLog,
}

impl MockCamera {
    /// Camera producing `width x height` frames.
    pub fn new(name: impl Into<String>, width: u32, height: u32, log: HardwareLog) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            frame_count: AtomicU64::new(0),
            timing: TimingConfig::default(),
            errors: ErrorConfig::none(),
            log,
        }
    }

    /// Apply simulated readout time.
    pub fn timing_config(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Inject failures.
    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Frames successfully delivered.
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Camera for MockCamera {
    async fn capture(&self) -> Result<Frame> {
        self.log.record(HardwareCall::Capture);
        self.errors.check_operation(&self.name, ops::CAPTURE)?;
        self.timing.readout().await;
        let n = self.frame_count.fetch_add(1, Ordering::Relaxed);
        Ok(Frame::new(self.width, self.height, test_pattern(self.width, self.height, n)))
    }
}

/// Diagonal gradient whose phase advances with the frame number.
pub fn test_pattern(width: u32, height: u32, frame_num: u64) -> Vec<u16> {
    let (w, h) = (width as usize, height as usize);
    let span = (w + h).max(1) as u64;
    let mut pixels = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let phase = (x as u64 + y as u64 + frame_num) % span;
            pixels.push((phase * u64::from(u16::MAX) / span) as u16);
        }
    }
    pixels
}
