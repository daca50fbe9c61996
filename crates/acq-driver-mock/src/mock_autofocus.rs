//! Mock autofocus with scripted corrections.

use acq_core::capabilities::Autofocus;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::common::errors::ops;
use crate::common::{ErrorConfig, HardwareCall, HardwareLog};

/// Returns scripted corrections in order, then `0.0` once the script runs out.
#[derive(Debug)]
pub struct MockAutofocus {
    name: String,
    script: Mutex<VecDeque<f64>>,
    errors: ErrorConfig,
    log: HardwareLog,
}

impl MockAutofocus {
    /// Autofocus that always reports zero correction.
    pub fn new(name: impl Into<String>, log: HardwareLog) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            errors: ErrorConfig::none(),
            log,
        }
    }

    /// Corrections (µm) returned by successive measurements.
    pub fn corrections(self, corrections: impl IntoIterator<Item = f64>) -> Self {
        self.script.lock().extend(corrections);
        self
    }

    /// Inject failures.
    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }
}

#[async_trait]
impl Autofocus for MockAutofocus {
    async fn measure(&self, channel: &str) -> Result<f64> {
        self.log.record(HardwareCall::Measure {
            channel: channel.to_string(),
        });
        self.errors.check_operation(&self.name, ops::MEASURE)?;
        Ok(self.script.lock().pop_front().unwrap_or(0.0))
    }
}
