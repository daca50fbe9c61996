//! Shared building blocks for the mock devices.

pub mod errors;
pub mod log;
pub mod rng;
pub mod timing;

pub use errors::{ErrorConfig, ErrorScenario};
pub use log::{HardwareCall, HardwareLog};
pub use rng::MockRng;
pub use timing::TimingConfig;
