//! Fetch policy constants and backoff calculation

use std::time::Duration;

/// Concurrent fetches per device.
pub const DEFAULT_CONCURRENCY: usize = 30;

/// Upper bound accepted for the concurrency setting.
pub const MAX_CONCURRENCY: usize = 128;

/// Total attempts per work unit, first attempt included.
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Per-attempt timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Calculate exponential backoff delay after failed attempt `retry_count` (0-based)
pub fn calculate_backoff(retry_count: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(retry_count);
    initial.saturating_mul(factor).min(max)
}

/// Retry and timeout policy applied to every work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per unit (at least 1)
    pub max_retries: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Cap for a single delay
    pub max_backoff: Duration,
    /// Timeout for a single attempt
    pub request_timeout: Duration,
}

impl RetryPolicy {
    /// Backoff to wait after failed attempt `retry_count` (0-based)
    pub fn backoff(&self, retry_count: u32) -> Duration {
        calculate_backoff(retry_count, self.initial_backoff, self.max_backoff)
    }

    /// Total attempts, never less than one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}
