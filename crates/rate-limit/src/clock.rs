//! Wall-clock time source for window timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of window timestamps, in milliseconds since the Unix epoch.
///
/// Timestamps are shared across processes through the store, so implementations must use
/// wall-clock time rather than a process-local monotonic clock.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}
