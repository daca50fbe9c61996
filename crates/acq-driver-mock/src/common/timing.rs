//! Simulated device latencies.

use std::time::Duration;

/// Per-operation delays applied by the mock devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingConfig {
    /// Stage and focus settling time in milliseconds
    pub settling_time_ms: u64,
    /// Exposure plus readout in milliseconds
    pub frame_readout_ms: u64,
    /// Property set/get round trip in milliseconds
    pub communication_delay_ms: u64,
}

impl TimingConfig {
    /// No delays. Used by tests.
    pub fn instant() -> Self {
        Self::default()
    }

    /// Delays in the range of a typical motorized widefield setup.
    pub fn realistic() -> Self {
        Self {
            settling_time_ms: 50,
            frame_readout_ms: 33,
            communication_delay_ms: 2,
        }
    }

    pub(crate) async fn settle(&self) {
        pause(self.settling_time_ms).await;
    }

    pub(crate) async fn readout(&self) {
        pause(self.frame_readout_ms).await;
    }

    pub(crate) async fn communicate(&self) {
        pause(self.communication_delay_ms).await;
    }
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
