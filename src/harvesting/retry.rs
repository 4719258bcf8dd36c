//! # Retry Policy
//!
//! Shared retry/backoff policy for extraction tasks. Backoff scales
//! linearly with the attempt number (`base_delay * attempt`), capped and
//! jittered; rate-limit signals use their own longer base delay.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::harvesting::error::ExtractError;

/// Retry policy settings shared by every extraction task in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum budget-charged attempts per instrument
    pub max_retries: u32,
    /// Base delay for general retryable failures (milliseconds)
    pub base_delay_ms: u64,
    /// Base delay for rate-limit backoff (milliseconds)
    pub rate_limit_delay_ms: u64,
    /// Upper bound on any computed backoff (milliseconds)
    pub max_delay_ms: u64,
    /// Jitter range added on top of backoff (milliseconds)
    pub jitter_range_ms: u64,
    /// Forced reloads allowed within one attempt before it fails
    pub max_reloads_per_attempt: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2_000,
            rate_limit_delay_ms: 5_000,
            max_delay_ms: 30_000,
            jitter_range_ms: 250,
            max_reloads_per_attempt: 3,
        }
    }
}

impl RetryPolicy {
    /// True while the instrument still has budget for another attempt
    #[must_use]
    pub const fn has_budget(&self, charged_attempts: u32) -> bool {
        charged_attempts < self.max_retries
    }

    /// Backoff before the next attempt, scaled linearly by the attempt
    /// number of the attempt that just failed.
    ///
    /// Jitter is bounded by `jitter_range_ms`, which stays below the base
    /// delay so the backoff sequence is non-decreasing in attempt number.
    #[must_use]
    pub fn backoff_for(&self, error: &ExtractError, failed_attempt: u32) -> Duration {
        let base = match error {
            ExtractError::RateLimited(_) => self.rate_limit_delay_ms,
            _ => self.base_delay_ms,
        };
        let scaled = base.saturating_mul(u64::from(failed_attempt.max(1)));
        let capped = std::cmp::min(scaled, self.max_delay_ms);
        let jitter = fastrand::u64(0..=self.jitter_range_ms);

        Duration::from_millis(capped + jitter)
    }

    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}
