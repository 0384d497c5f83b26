//! Process-wide upstream rate limiter.
//!
//! One `RateLimiter` is constructed at startup from `UpstreamSettings::
//! requests_per_second` and shared by `Arc` with every collaborator that
//! calls the upstream client (backfill, live tail, classifier), constructed
//! explicitly and shared, not a process-global singleton.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{Quota, RateLimiter as GovernorLimiter};
use governor::state::{InMemoryState, NotKeyed};
use governor::clock::DefaultClock;

type Limiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Paces upstream HTTP calls to a target requests/second, and exposes the
/// 429 backoff delay (`2 * (1/R)`) every caller retries with.
pub struct RateLimiter {
    limiter: Limiter,
    requests_per_second: u32,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second.max(1)).unwrap();
        Self {
            limiter: GovernorLimiter::direct(Quota::per_second(rps)),
            requests_per_second: requests_per_second.max(1),
        }
    }

    /// Suspend until a slot opens, pacing calls to at most `R`/second.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// The backoff delay a caller sleeps after an HTTP 429: `2 * (1/R)`.
    pub fn backoff_on_429(&self) -> Duration {
        Duration::from_secs_f64(2.0 / self.requests_per_second as f64)
    }

    /// The steady-state pacing delay between consecutive classifier calls: `1/R`.
    pub fn pacing_delay(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.requests_per_second as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_double_the_pacing_delay() {
        let limiter = RateLimiter::new(10);
        assert_eq!(limiter.backoff_on_429(), limiter.pacing_delay() * 2);
    }

    #[tokio::test]
    async fn acquire_does_not_hang() {
        let limiter = RateLimiter::new(1000);
        limiter.acquire().await;
        limiter.acquire().await;
    }
}
