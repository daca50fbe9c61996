//! Error injection framework for mock devices.
//!
//! Enables configurable failures for resilience testing of the acquisition
//! engine. Failures surface as [`DriverError`]s wrapped in `anyhow::Error`,
//! the same way a real driver reports them.

use super::rng::MockRng;
use acq_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Operation names understood by the mock devices.
pub mod ops {
    pub const MOVE_XY: &str = "move_xy";
    pub const MOVE_Z: &str = "move_z";
    pub const SET_PROPERTY: &str = "set_property";
    pub const GET_PROPERTY: &str = "get_property";
    pub const CAPTURE: &str = "capture";
    pub const MEASURE: &str = "measure";
    pub const SAVE: &str = "save";
}

/// A failure pattern for one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorScenario {
    /// Fail every call after N successful ones
    FailAfterN { operation: &'static str, count: u32 },
    /// Fail exactly the Nth call (1-based)
    FailOnCall { operation: &'static str, call: u32 },
    /// Fail every call
    Always { operation: &'static str },
    /// Time out on every call
    Timeout { operation: &'static str },
    /// Fail with the given probability
    Random { operation: &'static str, rate: f64 },
}

impl ErrorScenario {
    fn operation(&self) -> &'static str {
        match self {
            ErrorScenario::FailAfterN { operation, .. }
            | ErrorScenario::FailOnCall { operation, .. }
            | ErrorScenario::Always { operation }
            | ErrorScenario::Timeout { operation }
            | ErrorScenario::Random { operation, .. } => operation,
        }
    }
}

/// Error injection configuration for mock devices
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    scenarios: Arc<Vec<ErrorScenario>>,
    rng: Arc<MockRng>,
    /// Calls seen per operation
    counts: Arc<Mutex<HashMap<&'static str, u32>>>,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl ErrorConfig {
    /// Create error config with no errors (default)
    pub fn none() -> Self {
        Self::scenarios(Vec::new())
    }

    /// Create error config with a single scenario
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Create error config with multiple scenarios
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
            rng: Arc::new(MockRng::new(None)),
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Seed the RNG used by [`ErrorScenario::Random`].
    pub fn seeded(mut self, seed: u64) -> Self {
        self.rng = Arc::new(MockRng::new(Some(seed)));
        self
    }

    /// Count one call of `operation` and decide whether it fails.
    pub fn check_operation(&self, device: &str, operation: &'static str) -> Result<(), DriverError> {
        let call = {
            let mut counts = self.counts.lock();
            let count = counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        for scenario in self.scenarios.iter().filter(|s| s.operation() == operation) {
            let failure = match scenario {
                ErrorScenario::FailAfterN { count, .. } if call > *count => Some((
                    DriverErrorKind::Hardware,
                    format!("Injected failure after {} operations", count),
                )),
                ErrorScenario::FailOnCall { call: n, .. } if call == *n => Some((
                    DriverErrorKind::Hardware,
                    format!("Injected failure on call {}", n),
                )),
                ErrorScenario::Always { .. } => Some((DriverErrorKind::Hardware, "Injected failure".to_string())),
                ErrorScenario::Timeout { .. } => Some((
                    DriverErrorKind::Timeout,
                    format!("Operation '{}' timed out", operation),
                )),
                ErrorScenario::Random { rate, .. } if self.rng.should_fail(*rate) => Some((
                    DriverErrorKind::Hardware,
                    format!("Random failure on operation '{}'", operation),
                )),
                _ => None,
            };
            if let Some((kind, message)) = failure {
                return Err(DriverError::new(device, kind, message));
            }
        }
        Ok(())
    }

    /// Calls seen so far for `operation`, failed ones included.
    pub fn call_count(&self, operation: &'static str) -> u32 {
        self.counts.lock().get(operation).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_errors_by_default() {
        let config = ErrorConfig::none();
        for _ in 0..10 {
            assert!(config.check_operation("cam", ops::CAPTURE).is_ok());
        }
        assert_eq!(config.call_count(ops::CAPTURE), 10);
    }

    #[test]
    fn fail_on_call_hits_once() {
        let config = ErrorConfig::scenario(ErrorScenario::FailOnCall {
            operation: ops::CAPTURE,
            call: 2,
        });
        assert!(config.check_operation("cam", ops::CAPTURE).is_ok());
        assert!(config.check_operation("cam", ops::CAPTURE).is_err());
        assert!(config.check_operation("cam", ops::CAPTURE).is_ok());
        assert!(config.check_operation("cam", ops::SAVE).is_ok());
    }

    #[test]
    fn fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: ops::MOVE_XY,
            count: 1,
        });
        assert!(config.check_operation("stage", ops::MOVE_XY).is_ok());
        let err = config.check_operation("stage", ops::MOVE_XY).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Hardware);
        assert_eq!(err.device, "stage");
    }

    #[test]
    fn timeout_kind() {
        let config = ErrorConfig::scenario(ErrorScenario::Timeout { operation: ops::MEASURE });
        let err = config.check_operation("af", ops::MEASURE).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Timeout);
    }
}
