use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Error-count based health for a node or disk.
///
/// Errors accumulate until `error_threshold`, after which the resource is
/// considered down until `retry_backoff` has elapsed since the last error.
/// Any success clears the count.
#[derive(Debug)]
pub struct FixedBackoffResourceStatePolicy {
    error_threshold: u32,
    retry_backoff: Duration,
    state: Mutex<BackoffState>,
}

#[derive(Debug, Default)]
struct BackoffState {
    failures: u32,
    down_until: Option<Instant>,
}

impl FixedBackoffResourceStatePolicy {
    pub fn new(error_threshold: u32, retry_backoff: Duration) -> Self {
        Self {
            error_threshold: error_threshold.max(1),
            retry_backoff,
            state: Mutex::new(BackoffState::default()),
        }
    }

    pub fn on_error(&self) {
        let mut state = self.state.lock();
        state.failures = state.failures.saturating_add(1);
        if state.failures >= self.error_threshold {
            state.down_until = Some(Instant::now() + self.retry_backoff);
        }
    }

    pub fn on_success(&self) {
        let mut state = self.state.lock();
        state.failures = 0;
        state.down_until = None;
    }

    pub fn is_down(&self) -> bool {
        let state = self.state.lock();
        matches!(state.down_until, Some(until) if Instant::now() < until)
    }

    pub fn failures(&self) -> u32 {
        self.state.lock().failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn goes_down_at_threshold_and_recovers_after_backoff() {
        let policy = FixedBackoffResourceStatePolicy::new(2, Duration::from_secs(30));

        policy.on_error();
        assert!(!policy.is_down());
        policy.on_error();
        assert!(policy.is_down());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(policy.is_down());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!policy.is_down());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failures() {
        let policy = FixedBackoffResourceStatePolicy::new(1, Duration::from_secs(30));
        policy.on_error();
        assert!(policy.is_down());
        assert_eq!(policy.failures(), 1);

        policy.on_success();
        assert!(!policy.is_down());
        assert_eq!(policy.failures(), 0);
    }
}
