//! Per-operation limit policies.

use std::time::Duration;

use config::MAX_WINDOW_SECONDS;

/// How many calls a single (resource, caller) pair may make within a sliding window.
///
/// Policies are validated once, when they are attached to a guarded operation, and are
/// immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    window_seconds: u64,
    max_count: u32,
}

impl LimitPolicy {
    /// Create a policy admitting `max_count` calls per `window_seconds` seconds.
    pub fn new(window_seconds: u64, max_count: u32) -> Result<Self, PolicyError> {
        if window_seconds == 0 {
            return Err(PolicyError::ZeroWindow);
        }

        if window_seconds > MAX_WINDOW_SECONDS {
            return Err(PolicyError::WindowTooLong);
        }

        if max_count == 0 {
            return Err(PolicyError::ZeroLimit);
        }

        Ok(Self {
            window_seconds,
            max_count,
        })
    }

    /// Length of the sliding window in seconds.
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Length of the sliding window.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// Maximum number of calls admitted within one window.
    pub fn max_count(&self) -> u32 {
        self.max_count
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_count: 5,
        }
    }
}

impl TryFrom<&config::PolicyConfig> for LimitPolicy {
    type Error = PolicyError;

    fn try_from(config: &config::PolicyConfig) -> Result<Self, Self::Error> {
        Self::new(config.window_seconds, config.max_count)
    }
}

/// Invalid policy values, detected when the policy is registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// The window length was zero.
    #[error("rate limit window must be at least one second")]
    ZeroWindow,
    /// The window was longer than [`MAX_WINDOW_SECONDS`].
    #[error("rate limit window must be at most {} seconds", MAX_WINDOW_SECONDS)]
    WindowTooLong,
    /// The admitted-count ceiling was zero.
    #[error("rate limit max_count must be at least one")]
    ZeroLimit,
}
