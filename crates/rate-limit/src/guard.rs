//! Wrapping arbitrary calls with an admission check.

use std::future::Future;
use std::sync::Arc;

use config::FailureMode;

use crate::error::{GuardError, Rejection};
use crate::key::CallIdentity;
use crate::limiter::{Decision, SlidingWindowLimiter};
use crate::policy::LimitPolicy;
use crate::storage::WindowStore;

/// Runs operations behind a [`SlidingWindowLimiter`].
///
/// The guard is transport agnostic: HTTP middleware, RPC interceptors or plain function
/// wrappers hand it the policy of the operation, a way to resolve the call identity and the
/// operation itself.
pub struct AdmissionGuard<S> {
    limiter: Arc<SlidingWindowLimiter<S>>,
    failure_mode: FailureMode,
}

impl<S> Clone for AdmissionGuard<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            failure_mode: self.failure_mode,
        }
    }
}

impl<S: WindowStore> AdmissionGuard<S> {
    /// Create a guard around `limiter`, applying `failure_mode` when the limiter cannot decide.
    pub fn new(limiter: Arc<SlidingWindowLimiter<S>>, failure_mode: FailureMode) -> Self {
        Self { limiter, failure_mode }
    }

    /// The limiter behind this guard.
    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter<S>> {
        &self.limiter
    }

    /// What happens to calls when the limiter cannot decide.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Run `operation` if the identity returned by `resolve` is within `policy`.
    ///
    /// Without an identity the limiter is not consulted and the call fails with
    /// [`GuardError::MissingContext`]. A rejected call never reaches `operation`. An admitted
    /// call returns the operation's own result.
    pub async fn run<R, F, Fut, T, E>(
        &self,
        policy: &LimitPolicy,
        resolve: R,
        operation: F,
    ) -> Result<T, GuardError<E>>
    where
        R: FnOnce() -> Option<CallIdentity>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(CallIdentity { resource, caller }) = resolve() else {
            log::debug!("Rejecting call without a resolvable identity");
            return Err(GuardError::MissingContext);
        };

        match self.limiter.admit(&resource, &caller, policy).await {
            Ok(Decision::Allowed { .. }) => operation().await.map_err(GuardError::Inner),
            Ok(Decision::Rejected { retry_after, .. }) => {
                let rejection = Rejection {
                    resource,
                    caller,
                    limit: policy.max_count(),
                    window: policy.window(),
                    retry_after,
                };

                log::warn!("Rate limit exceeded: {rejection}");

                Err(GuardError::RateLimited(rejection))
            }
            Err(error) => match self.failure_mode {
                FailureMode::Open => {
                    log::warn!("Letting call from {caller} to {resource} through without a rate limit check: {error}");
                    operation().await.map_err(GuardError::Inner)
                }
                FailureMode::Closed => Err(GuardError::Unavailable {
                    resource,
                    caller,
                    limit: policy.max_count(),
                    window: policy.window(),
                    source: error,
                }),
            },
        }
    }
}
