//! Token bucket limiter.
//!
//! The bucket starts full. Each admitted request drains one token, and tokens
//! come back at `refill_rate` per elapsed whole second, never beyond
//! `bucket_capacity`. The refill and the take happen inside one store call.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::key::RateLimitKey;
use super::settings::{Algorithm, LimiterSettings};
use crate::clock::Clock;
use crate::store::{CounterStore, StoreError, TokenBucketParams};

/// Suffix of the key holding the last refill time.
const STAMP_SUFFIX: &str = "ts";

/// Tokens available at `now_secs` for a bucket last refilled at
/// `last_refill` holding `stored` tokens.
///
/// A clock reading earlier than `last_refill` refills nothing.
pub(crate) fn refill_tokens(
    stored: u64,
    last_refill: i64,
    now_secs: i64,
    params: TokenBucketParams,
) -> u64 {
    let elapsed = now_secs.saturating_sub(last_refill).max(0) as u64;
    let refill = elapsed.saturating_mul(params.refill_rate);
    stored.saturating_add(refill).min(params.capacity)
}

/// Capacity-bounded reservoir refilled at a constant rate.
pub struct TokenBucketLimiter {
    settings: LimiterSettings,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// Create a new token bucket limiter.
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

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn allow(&self, key: &str) -> Result<bool, StoreError> {
        let key = RateLimitKey::new(Algorithm::TokenBucket, key);
        let now = self.clock.now_secs();

        let allowed = self
            .store
            .take_token(
                &key.to_string(),
                &key.companion(STAMP_SUFFIX),
                self.settings.bucket(),
                now,
            )
            .await?;

        trace!(key = %key, now, allowed, "Token bucket checked");
        if !allowed {
            debug!(key = %key, capacity = self.settings.bucket_capacity, "Token bucket empty");
        }
        Ok(allowed)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }
}
