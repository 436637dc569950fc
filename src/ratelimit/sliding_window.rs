//! Sliding window log limiter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};
use uuid::Uuid;

use super::backend::RateLimiter;
use super::key::RateLimitKey;
use super::settings::{Algorithm, LimiterSettings};
use crate::clock::Clock;
use crate::store::{CounterStore, StoreError};

/// Admits a request only while fewer than `requests` admitted requests fall
/// inside the trailing `window`.
///
/// Rejected attempts are not logged, so they do not extend a client's lockout.
pub struct SlidingWindowLimiter {
    settings: LimiterSettings,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Create a new sliding window limiter.
    pub fn new(
        settings: LimiterSettings,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            store,
            clock,
        }
    }
}

/// Log member for an event at `at_nanos`.
///
/// The score alone is not unique: two events in the same nanosecond would
/// collapse into one entry and under-count.
fn log_member(at_nanos: i64) -> String {
    format!("{}-{}", at_nanos, Uuid::new_v4().simple())
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn allow(&self, key: &str) -> Result<bool, StoreError> {
        let key = RateLimitKey::new(Algorithm::SlidingWindow, key);
        let now = self.clock.now_nanos();

        let allowed = self
            .store
            .record_in_window(
                &key.to_string(),
                now,
                &log_member(now),
                self.settings.window,
                self.settings.requests,
            )
            .await?;

        trace!(key = %key, at = now, allowed, "Sliding window checked");
        if !allowed {
            debug!(key = %key, limit = self.settings.requests, "Sliding window exceeded");
        }
        Ok(allowed)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn limiter(requests: u64, window: Duration) -> (Arc<ManualClock>, SlidingWindowLimiter) {
        let clock = Arc::new(ManualClock::at_secs(1_700_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let settings = LimiterSettings {
            algorithm: Algorithm::SlidingWindow,
            requests,
            window,
            bucket_capacity: 0,
            refill_rate: 0,
        };
        (clock.clone(), SlidingWindowLimiter::new(settings, store, clock))
    }

    #[tokio::test]
    async fn test_trailing_window() {
        let (clock, limiter) = limiter(2, Duration::from_secs(5));

        assert!(limiter.allow("u1").await.unwrap()); // t=0
        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("u1").await.unwrap()); // t=1
        clock.advance(Duration::from_secs(1));
        assert!(!limiter.allow("u1").await.unwrap()); // t=2

        // t=6: the t=0 entry has left the window, the t=1 entry has not
        clock.advance(Duration::from_secs(4));
        assert!(limiter.allow("u1").await.unwrap());
        assert!(!limiter.allow("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_same_instant_requests_are_all_counted() {
        let (_clock, limiter) = limiter(3, Duration::from_secs(1));

        // The clock never moves, so every event shares one timestamp.
        assert!(limiter.allow("u1").await.unwrap());
        assert!(limiter.allow("u1").await.unwrap());
        assert!(limiter.allow("u1").await.unwrap());
        assert!(!limiter.allow("u1").await.unwrap());
    }

    #[test]
    fn test_log_member_is_unique() {
        assert_ne!(log_member(42), log_member(42));
        assert!(log_member(42).starts_with("42-"));
    }
}
