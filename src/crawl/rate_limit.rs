//! Request budget and backoff policy

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::trace;

/// Client-side budget of N requests per window, shared by every fetch.
///
/// Requests beyond the budget wait; they are never dropped.
pub struct RequestBudget {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl RequestBudget {
    pub fn new(requests_per_window: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(requests_per_window).unwrap_or(nonzero!(1u32));
        let period = (window / burst.get()).max(Duration::from_millis(1));
        let quota = Quota::with_period(period)
            .map(|q| q.allow_burst(burst))
            .unwrap_or_else(|| Quota::per_second(burst));

        Self {
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Wait until a request is allowed
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
        trace!("Request budget granted");
    }
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(20)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Honour a server-provided wait, still bounded by the ceiling
    pub fn clamp(&self, requested: Duration) -> Duration {
        requested.min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_budget_allows_burst_then_waits() {
        let budget = RequestBudget::new(2, Duration::from_millis(200));

        let start = Instant::now();
        budget.wait().await;
        budget.wait().await;
        assert!(start.elapsed() < Duration::from_millis(50));

        budget.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_millis(1000));
        assert_eq!(backoff.delay(40), Duration::from_millis(1000));
        assert_eq!(
            backoff.clamp(Duration::from_secs(3600)),
            Duration::from_millis(1000)
        );
    }
}
