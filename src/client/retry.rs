use std::time::Duration;

/// Bounded retry for idempotent broker calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Policy allowing `retries` attempts after the first
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self::with_retries(0)
    }

    /// Wait before attempt `attempt + 1`; doubles each time up to `max_backoff`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Gateway statuses worth another attempt.
///
/// 504 is absent: the broker answers a query timeout with it.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 502 | 503)
}
