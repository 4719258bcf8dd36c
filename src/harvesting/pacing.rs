//! # Request Pacing
//!
//! Inter-request pacing for the HTTP-fetch harvesting variant: a
//! token-bucket limiter plus a fixed delay with random jitter before every
//! request. Rate-limit *backoff* lives in the retry policy; this module
//! only spaces requests out.

use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;

/// Paces outgoing requests across all tasks sharing this instance
pub struct RequestPacer {
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    base_delay: Duration,
    jitter_range_ms: u64,
}

impl RequestPacer {
    /// Creates a pacer allowing `requests_per_second` through the bucket,
    /// with `base_delay_ms + [0, jitter_range_ms]` slept before each request.
    ///
    /// A zero rate is clamped to one request per second.
    #[must_use]
    pub fn new(requests_per_second: u32, base_delay_ms: u64, jitter_range_ms: u64) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN),
        );

        Self {
            rate_limiter: RateLimiter::direct(quota),
            base_delay: Duration::from_millis(base_delay_ms),
            jitter_range_ms,
        }
    }

    /// Waits until the next request is allowed to go out.
    ///
    /// Suspends only the calling task.
    pub async fn pace(&self) {
        self.rate_limiter.until_ready().await;

        let jitter = Duration::from_millis(fastrand::u64(0..=self.jitter_range_ms));
        tokio::time::sleep(self.base_delay + jitter).await;
    }
}

impl std::fmt::Debug for RequestPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPacer")
            .field("base_delay", &self.base_delay)
            .field("jitter_range_ms", &self.jitter_range_ms)
            .finish_non_exhaustive()
    }
}
