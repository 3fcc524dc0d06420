//! Error types for rate limiting.

use std::fmt;
use std::time::Duration;

use crate::key::WindowKey;
use crate::storage::StorageError;

/// The limiter could not reach a decision.
#[derive(Debug, thiserror::Error)]
pub enum LimiterError {
    /// The window store failed, including after a retry when one is configured.
    #[error("rate limiter unavailable for key '{key}': {source}")]
    Unavailable {
        /// Key of the window the check was for.
        key: WindowKey,
        /// The last store failure.
        source: StorageError,
    },
}

/// Details of a call rejected for exceeding its rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// The guarded resource.
    pub resource: String,
    /// The rejected caller.
    pub caller: String,
    /// Calls admitted per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
    /// Time until the window admits another call.
    pub retry_after: Duration,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} exceeded {} calls per {}s on {}",
            self.caller,
            self.limit,
            self.window.as_secs(),
            self.resource
        )
    }
}

/// Failures of a guarded call.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    /// The caller or resource identity could not be resolved.
    #[error("missing caller or resource identity")]
    MissingContext,
    /// The caller exceeded its rate. The guarded operation did not run.
    #[error("rate limit exceeded: {0}")]
    RateLimited(Rejection),
    /// The limiter could not decide and the deployment fails closed.
    #[error("rate limiter unavailable for {caller} on {resource} ({limit} calls per {}s): {source}", .window.as_secs())]
    Unavailable {
        /// The guarded resource.
        resource: String,
        /// The caller.
        caller: String,
        /// Calls admitted per window.
        limit: u32,
        /// Window length.
        window: Duration,
        /// Why the limiter could not decide.
        source: LimiterError,
    },
    /// The guarded operation itself failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> GuardError<E> {
    /// Time after which a rate-limited call may be retried.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(rejection) => Some(rejection.retry_after),
            _ => None,
        }
    }
}
