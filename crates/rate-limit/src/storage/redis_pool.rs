//! Pooled multiplexed connections to the window store.

use std::sync::atomic::{AtomicU64, Ordering};

use deadpool::managed::{self, Metrics, PoolConfig, RecycleError, RecycleResult};
use redis::{Client, ClientTlsConfig, ErrorKind, RedisError, RedisResult, TlsCertificates, aio::MultiplexedConnection};

use config::{RedisConfig, RedisTlsConfig};

pub(crate) type Pool = managed::Pool<ConnectionManager>;

/// Opens connections and health-checks them before they are handed out again.
#[derive(Debug)]
pub(crate) struct ConnectionManager {
    client: Client,
    probes: AtomicU64,
}

impl ConnectionManager {
    fn new(config: &RedisConfig) -> RedisResult<Self> {
        let client = match &config.tls {
            Some(tls) if tls.enabled => Client::build_with_tls(config.url.as_str(), tls_certificates(tls)?)?,
            _ => Client::open(config.url.as_str())?,
        };

        Ok(Self {
            client,
            probes: AtomicU64::new(0),
        })
    }
}

impl managed::Manager for ConnectionManager {
    type Type = MultiplexedConnection;
    type Error = RedisError;

    async fn create(&self) -> RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn recycle(&self, conn: &mut MultiplexedConnection, _: &Metrics) -> RecycleResult<RedisError> {
        // An echoed counter tells a live connection apart from one replaying a stale reply.
        let token = self.probes.fetch_add(1, Ordering::Relaxed).to_string();
        let echoed: String = redis::cmd("PING").arg(&token).query_async(conn).await?;

        if echoed != token {
            return Err(RecycleError::message("Unexpected PING reply from the window store"));
        }

        Ok(())
    }
}

fn read_file(path: &str, what: &'static str) -> RedisResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| RedisError::from((ErrorKind::IoError, what, format!("{path}: {e}"))))
}

fn tls_certificates(config: &RedisTlsConfig) -> RedisResult<TlsCertificates> {
    let client_tls = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert), Some(key)) => Some(ClientTlsConfig {
            client_cert: read_file(cert, "Failed to read client certificate")?,
            client_key: read_file(key, "Failed to read client key")?,
        }),
        _ => None,
    };

    let root_cert = config
        .ca_cert_path
        .as_deref()
        .map(|path| read_file(path, "Failed to read CA certificate"))
        .transpose()?;

    Ok(TlsCertificates { client_tls, root_cert })
}

/// Builds the pool. No connection is opened until the first checkout.
pub(crate) fn create_pool(config: &RedisConfig) -> RedisResult<Pool> {
    let mut pool_config = PoolConfig::default();

    if let Some(max_size) = config.pool.max_size {
        pool_config.max_size = max_size;
    }

    pool_config.timeouts.create = config.pool.timeout_create.or(config.connection_timeout);
    pool_config.timeouts.wait = config.pool.timeout_wait.or(config.connection_timeout);
    pool_config.timeouts.recycle = config.pool.timeout_recycle;

    Pool::builder(ConnectionManager::new(config)?)
        .config(pool_config)
        .runtime(deadpool::Runtime::Tokio1)
        .build()
        .map_err(|e| RedisError::from((ErrorKind::IoError, "Failed to create pool", e.to_string())))
}
