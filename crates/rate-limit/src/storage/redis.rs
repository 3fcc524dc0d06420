//! Redis-based window storage using one sorted set per key.
//!
//! Every entry is a member scored by its timestamp in milliseconds. Admission checks run as a
//! single Lua script on the server, so concurrent callers on the same key, from any number of
//! processes, are serialized by Redis itself.

use std::sync::LazyLock;
use std::time::Duration;

use redis::FromRedisValue;

use super::redis_pool::{self, Pool};
use super::{AdmitOutcome, AttemptId, StorageError, WindowStore, as_millis};
use crate::key::WindowKey;
use config::RedisConfig;

/// Record, prune, count and decide in one step.
///
/// KEYS[1]: the window key
/// ARGV[1]: attempt timestamp (score)
/// ARGV[2]: exclusive lower bound of the window, as a `(`-prefixed score
/// ARGV[3]: maximum admitted count
/// ARGV[4]: member for the attempt
/// ARGV[5]: key expiry in milliseconds
///
/// Returns `{admitted, count, oldest}` where `oldest` is -1 for an empty window.
const ADMIT_SCRIPT_SOURCE: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[3])

redis.call('ZADD', key, ARGV[1], ARGV[4])
redis.call('ZREMRANGEBYSCORE', key, '-inf', ARGV[2])

local count = redis.call('ZCARD', key)
local admitted = 1

if count > limit then
    redis.call('ZREM', key, ARGV[4])
    count = count - 1
    admitted = 0
end

redis.call('PEXPIRE', key, ARGV[5])

local oldest = -1
local first = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')

if first[2] then
    oldest = tonumber(first[2])
end

return {admitted, count, oldest}
"#;

static ADMIT_SCRIPT: LazyLock<redis::Script> = LazyLock::new(|| redis::Script::new(ADMIT_SCRIPT_SOURCE));

/// Redis-based window storage implementation.
pub struct RedisStore {
    /// Redis connection pool.
    pool: Pool,
    /// Upper bound for a single Redis round trip.
    response_timeout: Duration,
}

impl RedisStore {
    /// Create a new Redis storage instance and verify the server answers.
    pub async fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let storage = Self::lazy(config)?;

        storage
            .ping()
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to ping Redis server: {e}")))?;

        log::debug!("Connected to Redis at {}", redacted_url(&config.url));

        Ok(storage)
    }

    /// Create a Redis storage instance without opening any connection yet.
    pub fn lazy(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = redis_pool::create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        Ok(Self {
            pool,
            response_timeout: config.response_timeout.unwrap_or(Duration::from_secs(1)),
        })
    }

    /// Close the connection pool. Later operations fail with a connection error.
    pub fn close(&self) {
        self.pool.close();
    }

    async fn connection(&self) -> Result<deadpool::managed::Object<redis_pool::ConnectionManager>, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to get Redis connection from pool: {e}")))
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, StorageError> {
        let mut conn = self.connection().await?;

        tokio::time::timeout(self.response_timeout, cmd.query_async::<T>(&mut *conn))
            .await
            .map_err(|_| StorageError::Timeout(self.response_timeout))?
            .map_err(|e| StorageError::Query(e.to_string()))
    }
}

impl WindowStore for RedisStore {
    async fn record_event(&self, key: &WindowKey, timestamp: u64) -> Result<(), StorageError> {
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(key.as_str()).arg(timestamp).arg(member(timestamp, AttemptId::new()));

        self.query::<i64>(&cmd).await?;

        Ok(())
    }

    async fn prune_before(&self, key: &WindowKey, threshold: u64) -> Result<u64, StorageError> {
        let mut cmd = redis::cmd("ZREMRANGEBYSCORE");
        cmd.arg(key.as_str()).arg("-inf").arg(exclusive(threshold));

        self.query::<u64>(&cmd).await
    }

    async fn count(&self, key: &WindowKey) -> Result<u64, StorageError> {
        let mut cmd = redis::cmd("ZCARD");
        cmd.arg(key.as_str());

        self.query::<u64>(&cmd).await
    }

    async fn set_expiry(&self, key: &WindowKey, ttl: Duration) -> Result<(), StorageError> {
        let mut cmd = redis::cmd("PEXPIRE");
        cmd.arg(key.as_str()).arg(as_millis(ttl));

        self.query::<i64>(&cmd).await?;

        Ok(())
    }

    async fn compare_and_admit(
        &self,
        key: &WindowKey,
        timestamp: u64,
        attempt: AttemptId,
        window: Duration,
        max_count: u32,
    ) -> Result<AdmitOutcome, StorageError> {
        let threshold = timestamp.saturating_sub(as_millis(window));
        let ttl = as_millis(window.saturating_mul(2));

        let mut invocation = ADMIT_SCRIPT.key(key.as_str());
        invocation
            .arg(timestamp)
            .arg(exclusive(threshold))
            .arg(max_count)
            .arg(member(timestamp, attempt))
            .arg(ttl);

        let mut conn = self.connection().await?;

        let (admitted, count, oldest): (i64, i64, i64) =
            tokio::time::timeout(self.response_timeout, invocation.invoke_async::<(i64, i64, i64)>(&mut *conn))
                .await
                .map_err(|_| StorageError::Timeout(self.response_timeout))?
                .map_err(|e| StorageError::Query(e.to_string()))?;

        Ok(AdmitOutcome {
            admitted: admitted == 1,
            count: u64::try_from(count).unwrap_or_default(),
            oldest: u64::try_from(oldest).ok(),
        })
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let _: String = self.query(&redis::cmd("PING")).await?;

        Ok(())
    }
}

/// The sorted set member of an attempt. Attempts within the same millisecond stay apart, and a
/// replayed attempt maps onto its existing member.
fn member(timestamp: u64, attempt: AttemptId) -> String {
    format!("{timestamp}-{attempt}")
}

/// Exclusive score bound.
fn exclusive(score: u64) -> String {
    format!("({score}")
}

/// The URL without credentials, for logging.
fn redacted_url(url: &str) -> &str {
    match url.rsplit_once('@') {
        Some((_, host)) => host,
        None => url,
    }
}
