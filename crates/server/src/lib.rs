//! Windowgate server library.
//!
//! Provides a reusable server function to serve Windowgate either for the binary, or for the integration tests.

#![deny(missing_docs)]

mod health;
mod rate_limit;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use ::rate_limit::{AdmissionGuard, LimiterOptions, SlidingWindowLimiter, Storage};
use anyhow::anyhow;
use axum::{Router, routing::get};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use config::Config;
use health::HealthCheck;
use rate_limit::RateLimitLayer;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// How long in-flight requests may take to finish after shutdown was requested.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for serving Windowgate.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Windowgate TOML configuration.
    pub config: Config,
    /// Cancel to stop accepting connections and shut the server down.
    pub shutdown_signal: CancellationToken,
}

/// Greets the caller. The demo operation behind the rate limiter.
async fn hello() -> &'static str {
    "hello"
}

/// Starts and runs the Windowgate server with the provided configuration.
///
/// Returns once the shutdown signal was cancelled and in-flight requests finished.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
    }: ServeConfig,
) -> anyhow::Result<()> {
    let rate_limits = &config.server.rate_limits;
    let mut app = Router::new().route("/hello", get(hello));

    let limiter = if rate_limits.enabled {
        log::debug!("Initializing rate limit storage");

        let storage = Storage::from_config(&rate_limits.storage)
            .await
            .map_err(|e| anyhow!("Failed to initialize rate limit storage: {e}"))?;

        let limiter = Arc::new(SlidingWindowLimiter::new(storage, LimiterOptions::from(rate_limits)));
        let guard = AdmissionGuard::new(limiter.clone(), rate_limits.failure_mode);

        log::debug!(
            "Applying rate limiting to {} route(s), failing {:?} when the store is unavailable",
            rate_limits.routes.len(),
            rate_limits.failure_mode,
        );

        // Only matched routes are guarded, unknown paths reach the 404 fallback unlimited.
        app = app.route_layer(RateLimitLayer::new(guard, rate_limits)?);

        Some(limiter)
    } else {
        log::debug!("Rate limiting disabled");
        None
    };

    let health_check = HealthCheck::new(limiter.clone());
    let health_handle = Handle::new();

    // Add health endpoint (never rate limited - added AFTER rate limiting)
    if config.server.health.enabled {
        if let Some(listen) = config.server.health.listen {
            let tls = config.server.tls.clone();
            let health_config = config.server.health.clone();
            let check = health_check.clone();
            let handle = health_handle.clone();

            tokio::spawn(async move {
                if let Err(e) = health::bind_health_endpoint(listen, tls, health_config, check, handle).await {
                    log::error!("{e}");
                }
            });
        } else {
            app = app.merge(health::router(&config.server.health.path, health_check));
        }
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    let app = app.into_make_service_with_connect_info::<SocketAddr>();

    let result = match &config.server.tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            log::info!("Windowgate listening on https://{listen_address}");

            let handle = Handle::new();
            tokio::spawn(shutdown_on_cancel(shutdown_signal.clone(), handle.clone()));

            axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
                .handle(handle)
                .serve(app)
                .await
                .map_err(|e| anyhow!("Failed to start HTTPS server: {e}"))
        }
        None => {
            log::info!("Windowgate listening on http://{listen_address}");

            let signal = shutdown_signal.clone();

            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))
        }
    };

    health_handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));

    if let Some(limiter) = limiter {
        log::debug!("Closing rate limit storage");
        limiter.store().close();
    }

    result
}

async fn shutdown_on_cancel(signal: CancellationToken, handle: Handle) {
    signal.cancelled().await;
    handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
}
