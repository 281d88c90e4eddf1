//! Capped exponential backoff settings for withdrawal retries
//!
//! The delay after failed attempt `n` is `min(2^n * base_delay, max_delay)`:
//! the first retry waits `2 * base_delay` and every later one doubles it.

use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

/// How many times a withdrawal is attempted and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Retries after the first attempt; at least one attempt is always made
    pub fn retries(&self) -> u32 {
        self.max_attempts.max(1) - 1
    }

    /// Delay before the first retry
    pub fn initial_backoff(&self) -> Duration {
        self.base_delay.saturating_mul(2).min(self.max_delay)
    }
}
