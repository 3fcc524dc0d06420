//! Storage backends for sliding window logs.

use std::fmt;
use std::time::Duration;

use config::StorageConfig;
use uuid::Uuid;

use crate::key::WindowKey;

pub mod memory;
pub mod redis;
pub(crate) mod redis_pool;

pub use memory::InMemoryStore;
pub use redis::RedisStore;

/// Identity of one admission attempt.
///
/// A retried admission reuses the id of the attempt it repeats, so a store that already
/// recorded the first try replaces that entry instead of adding a second one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(Uuid);

impl AttemptId {
    /// Sorts before every random id.
    pub(crate) const MIN: AttemptId = AttemptId(Uuid::nil());

    /// A fresh, random attempt id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.simple().fmt(f)
    }
}

/// Result of an atomic admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitOutcome {
    /// Whether the attempt was admitted and its entry kept.
    pub admitted: bool,
    /// Number of live entries in the window after the decision, including the attempt when
    /// it was admitted.
    pub count: u64,
    /// Timestamp of the oldest live entry, if any.
    pub oldest: Option<u64>,
}

/// A shared store holding one sorted log of timestamps per key.
///
/// The individual operations are building blocks; limiting decisions must go through
/// [`WindowStore::compare_and_admit`], which performs all of them as one indivisible step
/// with respect to any other caller on the same key.
#[allow(async_fn_in_trait)]
pub trait WindowStore: Send + Sync {
    /// Insert one entry scored by `timestamp`.
    async fn record_event(&self, key: &WindowKey, timestamp: u64) -> Result<(), StorageError>;

    /// Remove all entries with a score strictly below `threshold`, returning how many went.
    async fn prune_before(&self, key: &WindowKey, threshold: u64) -> Result<u64, StorageError>;

    /// Number of entries currently stored under `key`.
    async fn count(&self, key: &WindowKey) -> Result<u64, StorageError>;

    /// Set or refresh the time-to-live of the whole key.
    async fn set_expiry(&self, key: &WindowKey, ttl: Duration) -> Result<(), StorageError>;

    /// Atomically record an attempt at `timestamp`, prune entries older than `window`, count
    /// the live entries and keep the attempt only if the count stays within `max_count`.
    ///
    /// An entry already recorded for `attempt` is replaced, not duplicated. The key's expiry
    /// is refreshed to two windows.
    async fn compare_and_admit(
        &self,
        key: &WindowKey,
        timestamp: u64,
        attempt: AttemptId,
        window: Duration,
        max_count: u32,
    ) -> Result<AdmitOutcome, StorageError>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), StorageError>;
}

/// Errors that can occur in storage backends.
///
/// Every variant means the store could not be used for this operation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Could not connect to, or get a connection for, the backend.
    #[error("Storage connection error: {0}")]
    Connection(String),
    /// The backend failed to execute a command.
    #[error("Storage query error: {0}")]
    Query(String),
    /// The backend did not answer in time.
    #[error("Storage did not respond within {0:?}")]
    Timeout(Duration),
}

/// The configured storage backend.
pub enum Storage {
    /// Process-local storage.
    Memory(InMemoryStore),
    /// Redis storage shared by all instances.
    Redis(RedisStore),
}

impl Storage {
    /// Create the storage backend described by the configuration.
    ///
    /// Redis storage is connected and pinged before this returns.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        match config {
            StorageConfig::Memory => Ok(Storage::Memory(InMemoryStore::new())),
            StorageConfig::Redis(redis_config) => Ok(Storage::Redis(RedisStore::new(redis_config).await?)),
        }
    }

    /// Release backend resources. Pending operations fail afterwards.
    pub fn close(&self) {
        match self {
            Storage::Memory(_) => (),
            Storage::Redis(storage) => storage.close(),
        }
    }
}

impl WindowStore for Storage {
    async fn record_event(&self, key: &WindowKey, timestamp: u64) -> Result<(), StorageError> {
        match self {
            Storage::Memory(storage) => storage.record_event(key, timestamp).await,
            Storage::Redis(storage) => storage.record_event(key, timestamp).await,
        }
    }

    async fn prune_before(&self, key: &WindowKey, threshold: u64) -> Result<u64, StorageError> {
        match self {
            Storage::Memory(storage) => storage.prune_before(key, threshold).await,
            Storage::Redis(storage) => storage.prune_before(key, threshold).await,
        }
    }

    async fn count(&self, key: &WindowKey) -> Result<u64, StorageError> {
        match self {
            Storage::Memory(storage) => storage.count(key).await,
            Storage::Redis(storage) => storage.count(key).await,
        }
    }

    async fn set_expiry(&self, key: &WindowKey, ttl: Duration) -> Result<(), StorageError> {
        match self {
            Storage::Memory(storage) => storage.set_expiry(key, ttl).await,
            Storage::Redis(storage) => storage.set_expiry(key, ttl).await,
        }
    }

    async fn compare_and_admit(
        &self,
        key: &WindowKey,
        timestamp: u64,
        attempt: AttemptId,
        window: Duration,
        max_count: u32,
    ) -> Result<AdmitOutcome, StorageError> {
        match self {
            Storage::Memory(storage) => {
                storage
                    .compare_and_admit(key, timestamp, attempt, window, max_count)
                    .await
            }
            Storage::Redis(storage) => {
                storage
                    .compare_and_admit(key, timestamp, attempt, window, max_count)
                    .await
            }
        }
    }

    async fn ping(&self) -> Result<(), StorageError> {
        match self {
            Storage::Memory(storage) => storage.ping().await,
            Storage::Redis(storage) => storage.ping().await,
        }
    }
}

/// Milliseconds in `duration`, saturating.
pub(crate) fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
