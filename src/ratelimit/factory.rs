//! Limiter construction.

use std::sync::Arc;

use tracing::info;

use super::backend::RateLimiter;
use super::fixed_window::FixedWindowLimiter;
use super::settings::{Algorithm, LimiterSettings};
use super::sliding_window::SlidingWindowLimiter;
use super::token_bucket::TokenBucketLimiter;
use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::error::{GatekeeperError, Result};
use crate::store::CounterStore;

/// Builds the configured [`RateLimiter`].
///
/// The store handle must be supplied explicitly; the clock defaults to the
/// system clock.
pub struct LimiterBuilder {
    config: LimiterConfig,
    store: Option<Arc<dyn CounterStore>>,
    clock: Arc<dyn Clock>,
}

impl LimiterBuilder {
    /// Start building a limiter from `config`.
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            config: config.clone(),
            store: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the counter store holding all limiter state.
    pub fn store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and construct the limiter.
    pub fn build(self) -> Result<Arc<dyn RateLimiter>> {
        let store = self
            .store
            .ok_or_else(|| GatekeeperError::Config("a counter store is required".to_string()))?;
        let settings = LimiterSettings::from_config(&self.config)?;

        info!(
            algorithm = %settings.algorithm,
            requests = settings.requests,
            window_ms = settings.window.as_millis() as u64,
            bucket_capacity = settings.bucket_capacity,
            refill_rate = settings.refill_rate,
            "Rate limiter configured"
        );

        let limiter: Arc<dyn RateLimiter> = match settings.algorithm {
            Algorithm::FixedWindow => Arc::new(FixedWindowLimiter::new(settings, store)),
            Algorithm::SlidingWindow => {
                Arc::new(SlidingWindowLimiter::new(settings, store, self.clock))
            }
            Algorithm::TokenBucket => {
                Arc::new(TokenBucketLimiter::new(settings, store, self.clock))
            }
        };
        Ok(limiter)
    }
}

/// Construct the limiter selected by `config` against `store`.
///
/// Fails when no store is given or the configuration does not validate.
pub fn new_limiter(
    config: &LimiterConfig,
    store: Option<Arc<dyn CounterStore>>,
) -> Result<Arc<dyn RateLimiter>> {
    let mut builder = LimiterBuilder::new(config);
    if let Some(store) = store {
        builder = builder.store(store);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn config(algorithm: &str) -> LimiterConfig {
        LimiterConfig {
            algorithm: algorithm.to_string(),
            requests: 3,
            window_ms: 10_000,
            bucket_capacity: 3,
            refill_rate: 1,
        }
    }

    #[test]
    fn test_missing_store_is_rejected() {
        let err = new_limiter(&config("fixed_window"), None)
            .err()
            .expect("construction without a store must fail");
        assert!(matches!(err, GatekeeperError::Config(msg) if msg.contains("store")));
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let err = new_limiter(&config("leaky_bucket"), Some(store))
            .err()
            .expect("unknown algorithms must fail");
        assert!(err.to_string().contains("unsupported rate limiting algorithm"));
    }

    #[test]
    fn test_each_algorithm_is_selected() {
        for (name, algorithm) in [
            ("fixed_window", Algorithm::FixedWindow),
            ("sliding_window", Algorithm::SlidingWindow),
            ("token_bucket", Algorithm::TokenBucket),
        ] {
            let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
            let limiter = assert_ok!(new_limiter(&config(name), Some(store)));
            assert_eq!(limiter.algorithm(), algorithm);
        }
    }

    /// Two limiters built from the same configuration, each over a fresh store,
    /// make the same decisions for the same timestamps.
    #[tokio::test]
    async fn test_identical_configuration_replays_identically() {
        let offsets_ms = [0u64, 100, 200, 300, 1_500, 2_000, 9_999, 10_001, 10_002, 13_000];

        for name in ["fixed_window", "sliding_window", "token_bucket"] {
            let mut runs = Vec::new();
            for _ in 0..2 {
                let clock = Arc::new(ManualClock::at_secs(1_700_000_000));
                let store = Arc::new(MemoryStore::with_clock(clock.clone()));
                let limiter = LimiterBuilder::new(&config(name))
                    .store(store)
                    .clock(clock.clone())
                    .build()
                    .unwrap();

                let mut decisions = Vec::new();
                for offset in offsets_ms {
                    clock.set(Duration::from_secs(1_700_000_000) + Duration::from_millis(offset));
                    decisions.push(limiter.allow("replay").await.unwrap());
                }
                runs.push(decisions);
            }
            assert_eq!(runs[0], runs[1], "{} should replay identically", name);
            assert!(runs[0].contains(&false), "{} should reject something", name);
        }
    }
}
