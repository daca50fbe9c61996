//! Cooperative abort flag shared between a run and its controllers.
//!
//! The flag is polled between events and raced against time-point waits. It
//! never interrupts a hardware command that is already in flight.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared abort request. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortSignal {
    /// Create a signal in the not-aborted state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request an abort. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Whether an abort has been requested.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once an abort has been requested.
    pub async fn aborted(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|aborted| *aborted).await;
    }

    /// Sleep until `deadline`, returning `false` early if aborted first.
    pub async fn sleep_until(&self, deadline: tokio::time::Instant) -> bool {
        if self.is_aborted() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => !self.is_aborted(),
            _ = self.aborted() => false,
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, Instant};

    #[tokio::test]
    async fn clones_share_state() {
        let signal = AbortSignal::new();
        let other = signal.clone();
        assert!(!other.is_aborted());
        signal.abort();
        assert!(other.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_cuts_wait_short() {
        let signal = AbortSignal::new();
        let waiter = signal.clone();
        let task = tokio::spawn(async move {
            waiter
                .sleep_until(Instant::now() + Duration::from_secs(3600))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.abort();
        assert!(!task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_completes_without_abort() {
        let signal = AbortSignal::new();
        let completed = signal
            .sleep_until(Instant::now() + Duration::from_millis(50))
            .await;
        assert!(completed);
    }
}
