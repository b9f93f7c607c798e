//! Retry policy with bounded exponential backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
/// Upper bound on any single backoff delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
/// Retries granted when retries are enabled without an explicit count.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Attempt counting and backoff for failing tasks.
///
/// Attempts are numbered from 1. Attempt `n + 1` is made only if
/// `should_retry(n)` holds, after sleeping `delay(n)`. The first attempt is
/// never delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// No retries: the first failure is final.
    pub fn disabled() -> Self {
        Self::new(0, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }

    /// Retries enabled with the default budget.
    pub fn enabled() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether a task that just failed attempt `attempt` gets another try.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Backoff to wait after failed attempt `attempt` (1-based).
    ///
    /// `min(base * 2^(attempt-1), max)`, saturating instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Total number of attempts a task may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}
