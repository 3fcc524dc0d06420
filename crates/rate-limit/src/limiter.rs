//! Sliding window log limiter.

use std::sync::Arc;
use std::time::Duration;

use config::RateLimitConfig;

use crate::clock::{Clock, SystemClock};
use crate::error::LimiterError;
use crate::key::{KeyBuilder, WindowKey};
use crate::policy::LimitPolicy;
use crate::storage::{AdmitOutcome, AttemptId, StorageError, WindowStore, as_millis};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The call may proceed.
    Allowed {
        /// Calls admitted in the current window, this one included.
        count: u64,
        /// Calls still admitted in the current window after this one.
        remaining: u64,
    },
    /// The caller exceeded its rate.
    Rejected {
        /// Calls admitted in the current window.
        count: u64,
        /// Time until the oldest admitted call leaves the window.
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the call may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Tunables of the limiter that do not depend on the guarded operation.
#[derive(Debug, Clone)]
pub struct LimiterOptions {
    /// Namespace prefix of every window key.
    pub key_prefix: String,
    /// Upper bound for one admission round trip to the store.
    pub store_timeout: Duration,
    /// Pause before the single retry of a failed admission, `None` to fail right away.
    pub retry_backoff: Option<Duration>,
}

impl Default for LimiterOptions {
    fn default() -> Self {
        Self {
            key_prefix: config::DEFAULT_KEY_PREFIX.to_string(),
            store_timeout: Duration::from_secs(1),
            retry_backoff: Some(Duration::from_millis(50)),
        }
    }
}

impl From<&RateLimitConfig> for LimiterOptions {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            key_prefix: config.key_prefix.clone(),
            store_timeout: config.store_timeout,
            retry_backoff: config.retry.then_some(config.retry_backoff),
        }
    }
}

/// Decides per call whether a (resource, caller) pair stays within its policy.
///
/// The limiter holds no counting state itself: every decision is one atomic
/// [`WindowStore::compare_and_admit`] against the shared store, which makes decisions
/// consistent across every process using the same store.
pub struct SlidingWindowLimiter<S> {
    store: S,
    keys: KeyBuilder,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    retry_backoff: Option<Duration>,
}

impl<S: WindowStore> SlidingWindowLimiter<S> {
    /// Create a limiter on top of `store`, using the system clock.
    pub fn new(store: S, options: LimiterOptions) -> Self {
        Self::with_clock(store, options, Arc::new(SystemClock))
    }

    /// Create a limiter with a custom clock.
    pub fn with_clock(store: S, options: LimiterOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            keys: KeyBuilder::new(options.key_prefix),
            clock,
            store_timeout: options.store_timeout,
            retry_backoff: options.retry_backoff,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The key builder used for window keys.
    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Check whether `caller` may call `resource` now under `policy`.
    ///
    /// The attempt counts toward its own decision: with a limit of N, the Nth call within a
    /// window is allowed and the N+1th rejected. Rejected attempts are not kept in the window.
    /// A store failure is retried once after the configured backoff and then reported as
    /// [`LimiterError::Unavailable`], never as a decision. The retry replays the same attempt,
    /// so a first try that reached the store but lost its reply is not counted twice.
    pub async fn admit(&self, resource: &str, caller: &str, policy: &LimitPolicy) -> Result<Decision, LimiterError> {
        let key = self.keys.build(resource, caller);
        let timestamp = self.clock.now_millis();
        let attempt = AttemptId::new();

        let outcome = match self.try_admit(&key, timestamp, attempt, policy).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let Some(backoff) = self.retry_backoff else {
                    log::error!("Rate limit store failed for key '{key}': {error}");
                    return Err(LimiterError::Unavailable { key, source: error });
                };

                log::warn!("Rate limit store failed for key '{key}', retrying in {backoff:?}: {error}");
                tokio::time::sleep(backoff).await;

                self.try_admit(&key, timestamp, attempt, policy).await.map_err(|error| {
                    log::error!("Rate limit store failed again for key '{key}': {error}");
                    LimiterError::Unavailable { key: key.clone(), source: error }
                })?
            }
        };

        let decision = self.decide(&outcome, policy);
        log::debug!("Rate limit decision for key '{key}': {decision:?}");

        Ok(decision)
    }

    /// Check that the store is reachable.
    pub async fn ping(&self) -> Result<(), StorageError> {
        tokio::time::timeout(self.store_timeout, self.store.ping())
            .await
            .map_err(|_| StorageError::Timeout(self.store_timeout))?
    }

    async fn try_admit(
        &self,
        key: &WindowKey,
        timestamp: u64,
        attempt: AttemptId,
        policy: &LimitPolicy,
    ) -> Result<AdmitOutcome, StorageError> {
        let admission = self
            .store
            .compare_and_admit(key, timestamp, attempt, policy.window(), policy.max_count());

        tokio::time::timeout(self.store_timeout, admission)
            .await
            .map_err(|_| StorageError::Timeout(self.store_timeout))?
    }

    fn decide(&self, outcome: &AdmitOutcome, policy: &LimitPolicy) -> Decision {
        let limit = u64::from(policy.max_count());

        if outcome.admitted {
            return Decision::Allowed {
                count: outcome.count,
                remaining: limit.saturating_sub(outcome.count),
            };
        }

        // The window frees a slot once its oldest entry slides out.
        let retry_after = outcome
            .oldest
            .map(|oldest| {
                let frees_at = oldest.saturating_add(as_millis(policy.window()));
                Duration::from_millis(frees_at.saturating_sub(self.clock.now_millis()))
            })
            .unwrap_or_default();

        Decision::Rejected {
            count: outcome.count,
            retry_after,
        }
    }
}
