//! In-memory window storage for single-process deployments and tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{AdmitOutcome, AttemptId, StorageError, WindowStore, as_millis};
use crate::key::WindowKey;

/// Number of admissions between two sweeps of expired keys.
const SWEEP_INTERVAL: u64 = 1024;

/// In-memory window storage.
///
/// Each key owns its own lock, held only while one operation runs against that key, so
/// callers on different keys never wait on each other. Admission decisions are only
/// serialized within this process.
#[derive(Default)]
pub struct InMemoryStore {
    windows: DashMap<String, Arc<Mutex<WindowLog>>>,
    admissions: AtomicU64,
}

impl InMemoryStore {
    /// Create a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop every key whose expiry has passed or whose log is empty.
    pub fn sweep_expired(&self) {
        let now = Instant::now();

        self.windows.retain(|_, log| {
            // Another task holds a handle to this log and may still write to it.
            if Arc::strong_count(log) > 1 {
                return true;
            }

            match log.try_lock() {
                Ok(log) => !(log.is_expired(now) || log.entries.is_empty()),
                Err(_) => true,
            }
        });
    }

    /// Lock handle for `key`, creating an empty log when missing.
    fn window(&self, key: &WindowKey) -> Arc<Mutex<WindowLog>> {
        self.windows.entry(key.as_str().to_string()).or_default().clone()
    }

    /// Lock handle for `key` without creating it.
    fn existing_window(&self, key: &WindowKey) -> Option<Arc<Mutex<WindowLog>>> {
        self.windows.get(key.as_str()).map(|log| Arc::clone(log.value()))
    }

    fn maybe_sweep(&self) {
        let admissions = self.admissions.fetch_add(1, Ordering::Relaxed) + 1;

        if admissions % SWEEP_INTERVAL == 0 {
            log::debug!("Sweeping expired rate limit windows ({} keys)", self.windows.len());
            self.sweep_expired();
        }
    }
}

impl WindowStore for InMemoryStore {
    async fn record_event(&self, key: &WindowKey, timestamp: u64) -> Result<(), StorageError> {
        let window = self.window(key);
        let mut log = window.lock().await;

        log.reset_if_expired(Instant::now());
        log.record(timestamp, AttemptId::new());

        Ok(())
    }

    async fn prune_before(&self, key: &WindowKey, threshold: u64) -> Result<u64, StorageError> {
        let Some(window) = self.existing_window(key) else {
            return Ok(0);
        };

        let mut log = window.lock().await;
        log.reset_if_expired(Instant::now());

        Ok(log.prune_before(threshold))
    }

    async fn count(&self, key: &WindowKey) -> Result<u64, StorageError> {
        let Some(window) = self.existing_window(key) else {
            return Ok(0);
        };

        let mut log = window.lock().await;
        log.reset_if_expired(Instant::now());

        Ok(log.len())
    }

    async fn set_expiry(&self, key: &WindowKey, ttl: Duration) -> Result<(), StorageError> {
        let Some(window) = self.existing_window(key) else {
            return Ok(());
        };

        let mut log = window.lock().await;
        log.expires_at = Instant::now().checked_add(ttl);

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
        let outcome = {
            let handle = self.window(key);
            let mut log = handle.lock().await;
            let now = Instant::now();

            log.reset_if_expired(now);
            log.record(timestamp, attempt);
            log.prune_before(timestamp.saturating_sub(as_millis(window)));

            let admitted = log.len() <= u64::from(max_count);

            if !admitted {
                log.withdraw(attempt);
            }

            log.expires_at = now.checked_add(window.saturating_mul(2));

            AdmitOutcome {
                admitted,
                count: log.len(),
                oldest: log.oldest(),
            }
        };

        self.maybe_sweep();

        Ok(outcome)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Entries recorded under one key, ordered by timestamp.
#[derive(Debug, Default)]
struct WindowLog {
    entries: BTreeSet<(u64, AttemptId)>,
    timestamps: HashMap<AttemptId, u64>,
    expires_at: Option<Instant>,
}

impl WindowLog {
    fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    fn record(&mut self, timestamp: u64, attempt: AttemptId) {
        if let Some(previous) = self.timestamps.insert(attempt, timestamp) {
            self.entries.remove(&(previous, attempt));
        }

        self.entries.insert((timestamp, attempt));
    }

    fn withdraw(&mut self, attempt: AttemptId) {
        if let Some(timestamp) = self.timestamps.remove(&attempt) {
            self.entries.remove(&(timestamp, attempt));
        }
    }

    fn prune_before(&mut self, threshold: u64) -> u64 {
        let kept = self.entries.split_off(&(threshold, AttemptId::MIN));
        let removed = std::mem::replace(&mut self.entries, kept);

        for (_, attempt) in &removed {
            self.timestamps.remove(attempt);
        }

        removed.len() as u64
    }

    fn oldest(&self) -> Option<u64> {
        self.entries.first().map(|(timestamp, _)| *timestamp)
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    fn reset_if_expired(&mut self, now: Instant) {
        if self.is_expired(now) {
            *self = WindowLog::default();
        }
    }
}
