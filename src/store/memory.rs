//! In-process counter store.
//!
//! Suitable for a single instance and for tests. Each operation runs with the
//! key's shard lock held from the first read to the last write, which gives
//! the same per-key serializability the Redis scripts provide.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{log_ttl, CounterStore, StoreError, TokenBucketParams};
use crate::clock::{Clock, SystemClock};
use crate::ratelimit::token_bucket::refill_tokens;

/// A value held under a key.
#[derive(Debug)]
enum Value {
    Counter(u64),
    Log(BTreeSet<(i64, String)>),
    Bucket { tokens: u64, last_refill: i64 },
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<Value>,
    expires_at: Option<Duration>,
}

impl Slot {
    fn is_expired(&self, now: Duration) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_vacant(&self) -> bool {
        match &self.value {
            None => true,
            Some(Value::Log(entries)) => entries.is_empty(),
            Some(_) => false,
        }
    }
}

/// Counter store held in process memory.
#[derive(Debug)]
pub struct MemoryStore {
    slots: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store that expires keys against the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store that expires keys against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.slots.iter().filter(|s| !s.is_expired(now)).count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now) && !slot.is_vacant());
        before.saturating_sub(self.slots.len())
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval` until the
    /// returned task is aborted.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(removed, "Purged expired counter store keys");
                }
            }
        })
    }

    /// Run `op` against the live slot for `key` with the key locked.
    fn update<R>(
        &self,
        key: &str,
        op: impl FnOnce(&mut Slot, Duration) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let now = self.clock.now();
        let mut slot = self.slots.entry(key.to_owned()).or_default();
        if slot.is_expired(now) {
            *slot = Slot::default();
        }

        let result = op(&mut slot, now);
        let vacant = slot.is_vacant();
        drop(slot);

        if vacant {
            self.slots.remove_if(key, |_, slot| slot.is_vacant());
        }
        result
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_window(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        self.update(key, |slot, now| {
            let count = match slot.value.get_or_insert(Value::Counter(0)) {
                Value::Counter(count) => {
                    *count += 1;
                    *count
                }
                _ => return Err(StoreError::WrongType(key.to_owned())),
            };
            if count == 1 || slot.expires_at.is_none() {
                slot.expires_at = Some(now + ttl);
            }
            Ok(count)
        })
    }

    async fn record_in_window(
        &self,
        key: &str,
        at_nanos: i64,
        member: &str,
        window: Duration,
        limit: u64,
    ) -> Result<bool, StoreError> {
        let window_start = at_nanos.saturating_sub(window.as_nanos() as i64);
        self.update(key, |slot, now| {
            let entries = match slot.value.get_or_insert_with(|| Value::Log(BTreeSet::new())) {
                Value::Log(entries) => entries,
                _ => return Err(StoreError::WrongType(key.to_owned())),
            };

            // Keep everything scored at or after the window start.
            *entries = entries.split_off(&(window_start, String::new()));

            if entries.len() as u64 >= limit {
                return Ok(false);
            }
            entries.insert((at_nanos, member.to_owned()));
            slot.expires_at = Some(now + log_ttl(window));
            Ok(true)
        })
    }

    async fn take_token(
        &self,
        tokens_key: &str,
        _stamp_key: &str,
        params: TokenBucketParams,
        now_secs: i64,
    ) -> Result<bool, StoreError> {
        // Both halves of the bucket live in one record under the tokens key.
        self.update(tokens_key, |slot, now| {
            let (tokens, last_refill) = match slot.value {
                None => (params.capacity, now_secs),
                Some(Value::Bucket {
                    tokens,
                    last_refill,
                }) => (
                    refill_tokens(tokens, last_refill, now_secs, params),
                    last_refill,
                ),
                Some(_) => return Err(StoreError::WrongType(tokens_key.to_owned())),
            };

            if tokens == 0 {
                return Ok(false);
            }

            slot.value = Some(Value::Bucket {
                tokens: tokens - 1,
                last_refill: last_refill.max(now_secs),
            });
            // Never pull an expiry earlier, even if the clock stepped back.
            let expires_at = now + params.idle_ttl();
            slot.expires_at = Some(slot.expires_at.map_or(expires_at, |at| at.max(expires_at)));
            Ok(true)
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
