//! Mock device property table.

use acq_core::capabilities::PropertyControl;
use acq_core::data::{PropertyId, PropertyValue};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::common::errors::ops;
use crate::common::{ErrorConfig, HardwareCall, HardwareLog, TimingConfig};

/// In-memory property table standing in for a device bus.
///
/// Reading a property that was never set fails, like querying an unknown
/// property on real hardware.
#[derive(Debug)]
pub struct MockPropertyControl {
    values: RwLock<HashMap<PropertyId, PropertyValue>>,
    timing: TimingConfig,
    errors: ErrorConfig,
    log: HardwareLog,
}

impl MockPropertyControl {
    /// Empty table recording into `log`.
    pub fn new(log: HardwareLog) -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            timing: TimingConfig::default(),
            errors: ErrorConfig::none(),
            log,
        }
    }

    /// Preload a property value without recording a call.
    pub fn with_value(self, property: PropertyId, value: impl Into<PropertyValue>) -> Self {
        self.values.write().insert(property, value.into());
        self
    }

    /// Apply simulated communication delay.
    pub fn timing_config(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Inject failures.
    pub fn error_config(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Current value without recording a call.
    pub fn peek(&self, property: &PropertyId) -> Option<PropertyValue> {
        self.values.read().get(property).cloned()
    }
}

#[async_trait]
impl PropertyControl for MockPropertyControl {
    async fn set_property(&self, property: &PropertyId, value: &PropertyValue) -> Result<()> {
        self.log.record(HardwareCall::SetProperty {
            property: property.clone(),
            value: value.clone(),
        });
        self.errors.check_operation(&property.device, ops::SET_PROPERTY)?;
        self.timing.communicate().await;
        self.values.write().insert(property.clone(), value.clone());
        Ok(())
    }

    async fn get_property(&self, property: &PropertyId) -> Result<PropertyValue> {
        self.log.record(HardwareCall::GetProperty {
            property: property.clone(),
        });
        self.errors.check_operation(&property.device, ops::GET_PROPERTY)?;
        self.timing.communicate().await;
        self.peek(property)
            .ok_or_else(|| anyhow!("Unknown property {}", property))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() {
        let props = MockPropertyControl::new(HardwareLog::new());
        let power = PropertyId::new("Laser", "Power");
        props.set_property(&power, &PropertyValue::Number(12.5)).await.unwrap();
        assert_eq!(props.get_property(&power).await.unwrap(), PropertyValue::Number(12.5));
        assert!(props.get_property(&PropertyId::new("Laser", "Mode")).await.is_err());
    }
}
