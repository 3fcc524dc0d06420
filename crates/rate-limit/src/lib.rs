//! Sliding window rate limiting.
//!
//! Every guarded call is attributed to a (resource, caller) pair. The timestamps of admitted
//! calls are kept in a shared store, one sorted log per pair, and a call is admitted when the
//! log holds at most the policy's `max_count` entries within the trailing window, the call
//! itself included.
//!
//! Supported stores:
//! - Redis, shared by every process, with admissions executed as a server-side script
//! - In-memory, for a single process, serialized per key

#![deny(missing_docs)]

mod clock;
mod error;
mod guard;
mod key;
mod limiter;
mod policy;
mod storage;

pub use clock::{Clock, SystemClock};
pub use config::FailureMode;
pub use error::{GuardError, LimiterError, Rejection};
pub use guard::AdmissionGuard;
pub use key::{CallIdentity, KeyBuilder, WindowKey};
pub use limiter::{Decision, LimiterOptions, SlidingWindowLimiter};
pub use policy::{LimitPolicy, PolicyError};
pub use storage::{AdmitOutcome, AttemptId, InMemoryStore, RedisStore, Storage, StorageError, WindowStore};
