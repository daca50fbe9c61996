//! Shared record of every call made to the mock devices.
//!
//! All devices built by one [`MockHardware`](crate::MockHardware) append to
//! the same log, so tests can assert on the global order of hardware calls.

use acq_core::data::{ImageCoordinates, PropertyId, PropertyValue};
use parking_lot::Mutex;
use std::sync::Arc;

/// One recorded device call. Failed calls are recorded too.
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareCall {
    MoveXy { x: f64, y: f64 },
    MoveZ { z: f64 },
    SetProperty { property: PropertyId, value: PropertyValue },
    GetProperty { property: PropertyId },
    Capture,
    Measure { channel: String },
    Save { coordinates: ImageCoordinates },
}

/// Cloneable handle on the call log.
#[derive(Debug, Clone, Default)]
pub struct HardwareLog {
    calls: Arc<Mutex<Vec<HardwareCall>>>,
}

impl HardwareLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, call: HardwareCall) {
        self.calls.lock().push(call);
    }

    /// Snapshot of all calls in order.
    pub fn calls(&self) -> Vec<HardwareCall> {
        self.calls.lock().clone()
    }

    /// Number of calls so far.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether nothing has been called.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Coordinates of every saved image, in order.
    pub fn saved(&self) -> Vec<ImageCoordinates> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HardwareCall::Save { coordinates } => Some(coordinates.clone()),
                _ => None,
            })
            .collect()
    }

    /// Values written to `property`, in order.
    pub fn property_writes(&self, property: &PropertyId) -> Vec<PropertyValue> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                HardwareCall::SetProperty { property: p, value } if p == property => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of capture attempts.
    pub fn capture_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, HardwareCall::Capture))
            .count()
    }

    /// Forget all recorded calls.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}
