use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use axum::{Json, Router, extract::State, routing::get};
use axum_server::Handle;
use config::{HealthConfig, TlsServerConfig};
use http::StatusCode;
use rate_limit::{SlidingWindowLimiter, Storage};

/// What the health endpoint checks besides the server answering at all.
#[derive(Clone, Default)]
pub(crate) struct HealthCheck {
    limiter: Option<Arc<SlidingWindowLimiter<Storage>>>,
}

impl HealthCheck {
    pub(crate) fn new(limiter: Option<Arc<SlidingWindowLimiter<Storage>>>) -> Self {
        Self { limiter }
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum HealthState {
    /// Indicates that the server is healthy and operational.
    Healthy,

    /// Indicates that the rate limit store cannot be reached.
    Unhealthy,
}

/// Handles health check requests and returns the current health status of the server.
pub(crate) async fn health(State(check): State<HealthCheck>) -> (StatusCode, Json<HealthState>) {
    let Some(limiter) = check.limiter else {
        return (StatusCode::OK, Json(HealthState::Healthy));
    };

    match limiter.ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthState::Healthy)),
        Err(e) => {
            log::warn!("Health check failed, rate limit store is unreachable: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, Json(HealthState::Unhealthy))
        }
    }
}

pub(crate) fn router(path: &str, check: HealthCheck) -> Router {
    Router::new().route(path, get(health)).with_state(check)
}

/// Binds the health check endpoint to the specified address and configuration.
pub(super) async fn bind_health_endpoint(
    addr: SocketAddr,
    tls_config: Option<TlsServerConfig>,
    health_config: HealthConfig,
    check: HealthCheck,
    handle: Handle,
) -> anyhow::Result<()> {
    let scheme = if tls_config.is_some() { "https" } else { "http" };
    let path = &health_config.path;
    let app = router(path, check).into_make_service();

    log::info!("Health check endpoint exposed at {scheme}://{addr}{path}");

    match tls_config {
        Some(tls) => {
            let rustls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.certificate, &tls.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {}", e))?;

            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(app)
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server in the health endpoint: {e}"))?;
        }
        None => axum_server::bind(addr)
            .handle(handle)
            .serve(app)
            .await
            .map_err(|e| anyhow!("Failed to start HTTP server in the health endpoint: {e}"))?,
    }

    Ok(())
}
