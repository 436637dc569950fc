//! Rate limiter trait shared by every strategy.

use async_trait::async_trait;

use super::settings::Algorithm;
use crate::store::StoreError;

/// Trait for rate limiting strategies.
///
/// Implementations keep no per-client state of their own; everything lives in
/// the counter store, so any number of processes can share one quota.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Decide whether one more request for `key` is admitted.
    ///
    /// `Ok(false)` is the normal over-quota outcome. Store failures are
    /// returned as errors, never turned into a decision.
    async fn allow(&self, key: &str) -> Result<bool, StoreError>;

    /// The algorithm this limiter runs.
    fn algorithm(&self) -> Algorithm;
}
