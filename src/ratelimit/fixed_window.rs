//! Fixed window limiter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::key::RateLimitKey;
use super::settings::{Algorithm, LimiterSettings};
use crate::store::{CounterStore, StoreError};

/// Counts requests in a window that starts with the first request and lasts
/// `window`.
///
/// A burst straddling a window boundary can see up to twice the quota within
/// less than one window. That is inherent to fixed windows.
pub struct FixedWindowLimiter {
    settings: LimiterSettings,
    store: Arc<dyn CounterStore>,
}

impl FixedWindowLimiter {
    /// Create a new fixed window limiter.
    pub fn new(settings: LimiterSettings, store: Arc<dyn CounterStore>) -> Self {
        Self { settings, store }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowLimiter {
    async fn allow(&self, key: &str) -> Result<bool, StoreError> {
        let key = RateLimitKey::new(Algorithm::FixedWindow, key);
        let count = self
            .store
            .increment_window(&key.to_string(), self.settings.window)
            .await?;

        let allowed = count <= self.settings.requests;
        trace!(key = %key, count, limit = self.settings.requests, "Fixed window checked");
        if !allowed {
            debug!(key = %key, count, limit = self.settings.requests, "Fixed window exceeded");
        }
        Ok(allowed)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn limiter(requests: u64, window: Duration) -> (Arc<ManualClock>, FixedWindowLimiter) {
        let clock = Arc::new(ManualClock::at_secs(1_700_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let settings = LimiterSettings {
            algorithm: Algorithm::FixedWindow,
            requests,
            window,
            bucket_capacity: 0,
            refill_rate: 0,
        };
        (clock, FixedWindowLimiter::new(settings, store))
    }

    #[tokio::test]
    async fn test_quota_then_reset() {
        let (clock, limiter) = limiter(3, Duration::from_secs(10));

        for i in 1..=3 {
            assert!(limiter.allow("u1").await.unwrap(), "Request {} should be admitted", i);
        }
        clock.advance(Duration::from_secs(5));
        assert!(!limiter.allow("u1").await.unwrap());

        // t=11s, past the window opened by the first request
        clock.advance(Duration::from_secs(6));
        assert!(limiter.allow("u1").await.unwrap());
        assert!(limiter.allow("u1").await.unwrap());
        assert!(limiter.allow("u1").await.unwrap());
        assert!(!limiter.allow("u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (_clock, limiter) = limiter(1, Duration::from_secs(10));

        assert!(limiter.allow("a").await.unwrap());
        assert!(!limiter.allow("a").await.unwrap());
        assert!(limiter.allow("b").await.unwrap());
    }
}
