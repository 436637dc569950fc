//! Redis-backed counter store.
//!
//! Each strategy's read-compute-write runs as one Lua script, so Redis
//! serializes it against every other command touching the same keys no
//! matter how many Gatekeeper instances share the server.

use std::fmt;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{Client, Script};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{log_ttl, CounterStore, StoreError, TokenBucketParams};

/// INCR, arming the expiry when the counter is new (or has lost its expiry).
const INCREMENT_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Purge, count, and conditionally insert into a sorted-set log.
///
/// Scores are passed through as strings: Lua numbers are doubles and would
/// lose precision when formatted back into a command argument.
const RECORD_IN_WINDOW: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[2])
local count = redis.call('ZCARD', KEYS[1])
if count >= tonumber(ARGV[3]) then
    return 0
end
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[5])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return 1
"#;

/// Refill and take one token from a bucket split across two keys.
const TAKE_TOKEN: &str = r#"
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local stored = redis.call('GET', KEYS[1])
local last = redis.call('GET', KEYS[2])

local tokens
if not stored or not last then
    tokens = capacity
    last = now
else
    last = tonumber(last)
    local elapsed = now - last
    if elapsed < 0 then
        elapsed = 0
    end
    tokens = math.min(capacity, tonumber(stored) + elapsed * refill_rate)
end

if tokens <= 0 then
    return 0
end

redis.call('SET', KEYS[1], tokens - 1, 'EX', ttl)
redis.call('SET', KEYS[2], math.max(last, now), 'EX', ttl)
return 1
"#;

/// Counter store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    increment_window: Script,
    record_in_window: Script,
    take_token: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the Redis server at `url` and verify it answers PING.
    pub async fn connect(url: &str, dial_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| {
            warn!(error = %e, "Invalid Redis URL");
            StoreError::Connection(e.to_string())
        })?;

        let connection = tokio::time::timeout(dial_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(dial_timeout))?
            .map_err(|e| {
                warn!(error = %e, "Failed to connect to Redis");
                StoreError::Connection(e.to_string())
            })?;

        let store = Self::from_connection(connection);
        tokio::time::timeout(dial_timeout, store.ping())
            .await
            .map_err(|_| StoreError::Timeout(dial_timeout))??;

        info!("Connected to Redis counter store");
        Ok(store)
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            increment_window: Script::new(INCREMENT_WINDOW),
            record_in_window: Script::new(RECORD_IN_WINDOW),
            take_token: Script::new(TAKE_TOKEN),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_window(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let count: u64 = self
            .increment_window
            .key(key)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn record_in_window(
        &self,
        key: &str,
        at_nanos: i64,
        member: &str,
        window: Duration,
        limit: u64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let window_start = at_nanos.saturating_sub(window.as_nanos() as i64);
        let recorded: i64 = self
            .record_in_window
            .key(key)
            .arg(at_nanos.to_string())
            .arg(window_start.to_string())
            .arg(limit)
            .arg(log_ttl(window).as_millis() as u64)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        reply_flag(recorded)
    }

    async fn take_token(
        &self,
        tokens_key: &str,
        stamp_key: &str,
        params: TokenBucketParams,
        now_secs: i64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let taken: i64 = self
            .take_token
            .key(tokens_key)
            .key(stamp_key)
            .arg(params.capacity)
            .arg(params.refill_rate)
            .arg(now_secs)
            .arg(params.idle_ttl().as_secs())
            .invoke_async(&mut conn)
            .await?;
        reply_flag(taken)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let reply: String = ::redis::cmd("PING").query_async(&mut conn).await?;
        if reply != "PONG" {
            return Err(StoreError::UnexpectedReply(reply));
        }
        debug!("Redis PING ok");
        Ok(())
    }
}

fn reply_flag(reply: i64) -> Result<bool, StoreError> {
    match reply {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::UnexpectedReply(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_flag() {
        assert!(!reply_flag(0).unwrap());
        assert!(reply_flag(1).unwrap());
        assert!(matches!(reply_flag(7), Err(StoreError::UnexpectedReply(_))));
    }
}
