//! Shared counter store.
//!
//! All rate-limit state lives here, never in the limiter strategies. Every
//! method is one atomic unit for the keys it touches: concurrent callers on
//! the same key observe a single serial history, while different keys proceed
//! independently. The Redis backend achieves this with server-side Lua
//! scripts; the in-memory backend with a per-shard lock held for the whole
//! read-compute-write.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors talking to, or returned by, the counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("key {0} holds a value of the wrong kind")]
    WrongType(String),
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),
    #[error("store backend error: {0}")]
    Backend(#[from] ::redis::RedisError),
}

/// Parameters of a token-bucket take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketParams {
    /// Maximum tokens the bucket holds.
    pub capacity: u64,
    /// Tokens added per elapsed second.
    pub refill_rate: u64,
}

impl TokenBucketParams {
    /// Lifetime of idle bucket state.
    ///
    /// After this long without a write the bucket would have refilled to
    /// capacity anyway, so letting the keys expire does not change any
    /// decision.
    pub fn idle_ttl(&self) -> Duration {
        let rate = self.refill_rate.max(1);
        Duration::from_secs(self.capacity.div_ceil(rate) + 1)
    }
}

/// Expiry of a timestamp log after its latest insert.
///
/// An entry still counts at exactly `window` after it was recorded, so the
/// log has to outlive that instant by one store tick.
pub fn log_ttl(window: Duration) -> Duration {
    window + Duration::from_millis(1)
}

/// The atomic primitives rate-limit strategies are built on.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key` and return the new value.
    ///
    /// When the increment creates the counter, its expiry is set to `ttl` in
    /// the same step.
    async fn increment_window(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Record an event in the timestamp log at `key` if the trailing window
    /// still has room.
    ///
    /// Entries scored before `at_nanos - window` are purged, the remainder is
    /// counted, and `(at_nanos, member)` is inserted only if that count is
    /// below `limit`. On insert the log's expiry is refreshed to
    /// [`log_ttl`]`(window)`.
    /// Returns whether the entry was recorded.
    async fn record_in_window(
        &self,
        key: &str,
        at_nanos: i64,
        member: &str,
        window: Duration,
        limit: u64,
    ) -> Result<bool, StoreError>;

    /// Refill the bucket stored at `tokens_key`/`stamp_key` up to `now_secs`
    /// and take one token if any is available.
    ///
    /// Absent state is a full bucket. Elapsed time below zero refills
    /// nothing, and the stored stamp never moves backwards. Nothing is written
    /// when the bucket is empty.
    async fn take_token(
        &self,
        tokens_key: &str,
        stamp_key: &str,
        params: TokenBucketParams,
        now_secs: i64,
    ) -> Result<bool, StoreError>;

    /// Check that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_ttl_outlives_window() {
        assert_eq!(log_ttl(Duration::from_secs(5)), Duration::from_millis(5_001));
    }

    #[test]
    fn test_idle_ttl_rounds_up() {
        let params = TokenBucketParams {
            capacity: 5,
            refill_rate: 2,
        };
        assert_eq!(params.idle_ttl(), Duration::from_secs(4));

        let params = TokenBucketParams {
            capacity: 10,
            refill_rate: 10,
        };
        assert_eq!(params.idle_ttl(), Duration::from_secs(2));
    }
}
