use std::time::Duration;

/// Exponential backoff bounded by an overall deadline: the first wait is
/// `initial_delay`, each subsequent wait doubles, and no attempt starts after
/// `timeout` has elapsed.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub timeout: Duration,
}

impl BackoffConfig {
    pub fn new(initial_delay: Duration, timeout: Duration) -> Self {
        Self {
            initial_delay,
            timeout,
        }
    }

    /// Delay before retry number `attempt` (0-based), saturating instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}
