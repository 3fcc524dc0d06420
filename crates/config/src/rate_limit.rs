//! Rate limiting configuration structures.

use std::collections::BTreeMap;
use std::time::Duration;

use duration_str::{deserialize_duration, deserialize_option_duration};
use serde::Deserialize;

/// Namespace prefix of window keys when none is configured.
pub const DEFAULT_KEY_PREFIX: &str = "req_limit:";

/// Longest accepted policy window, one year in seconds.
pub const MAX_WINDOW_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Rate limiting configuration for the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    pub enabled: bool,
    /// Prefix of every key written to the store.
    pub key_prefix: String,
    /// What happens to a call when the store cannot be reached.
    pub failure_mode: FailureMode,
    /// Upper bound for one admission round trip to the store.
    #[serde(deserialize_with = "deserialize_duration")]
    pub store_timeout: Duration,
    /// Whether a failed admission is retried once before giving up.
    pub retry: bool,
    /// Pause before the retry of a failed admission.
    #[serde(deserialize_with = "deserialize_duration")]
    pub retry_backoff: Duration,
    /// Take the caller address from `X-Forwarded-For` or `X-Real-IP` when present.
    pub trust_forwarded_headers: bool,
    /// Storage backend configuration.
    pub storage: StorageConfig,
    /// Policy for paths without an entry in `routes`. Such paths are not limited when unset.
    pub default: Option<PolicyConfig>,
    /// Policies per exact request path.
    pub routes: BTreeMap<String, PolicyConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            failure_mode: FailureMode::default(),
            store_timeout: Duration::from_secs(1),
            retry: true,
            retry_backoff: Duration::from_millis(50),
            trust_forwarded_headers: false,
            storage: StorageConfig::default(),
            default: None,
            routes: BTreeMap::new(),
        }
    }
}

/// A sliding window policy: at most `max_count` calls within `window_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    /// Length of the sliding window in seconds.
    pub window_seconds: u64,
    /// Maximum number of calls admitted within the window.
    pub max_count: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_count: 5,
        }
    }
}

/// Behavior when the limiter cannot reach a decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Let the call through unchecked.
    Open,
    /// Refuse the call.
    #[default]
    Closed,
}

/// Storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (default).
    #[default]
    Memory,
    /// Redis storage with configuration.
    Redis(Box<RedisConfig>),
}

/// Redis storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Response timeout for Redis commands.
    #[serde(
        default = "default_response_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    pub response_timeout: Option<Duration>,
    /// Connection timeout.
    #[serde(
        default = "default_connection_timeout",
        deserialize_with = "deserialize_option_duration"
    )]
    pub connection_timeout: Option<Duration>,
}

fn default_response_timeout() -> Option<Duration> {
    Some(Duration::from_secs(1))
}

fn default_connection_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            tls: None,
            response_timeout: default_response_timeout(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

/// Redis connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(5)),
            timeout_wait: Some(Duration::from_secs(5)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Enable TLS with the certificates below.
    pub enabled: bool,
    /// Path to CA certificate file.
    pub ca_cert_path: Option<String>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<String>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<String>,
}
