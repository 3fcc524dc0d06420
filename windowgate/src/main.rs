use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use args::Args;
use clap::Parser;
use config::Config;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args)?;

    let config = match args.config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration from {}: {e:#}", args.config.display());
            std::process::exit(1);
        }
    };

    let shutdown_signal = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(shutdown_signal.clone()));

    if let Err(e) = server::serve(serve_config(&args, config, shutdown_signal)).await {
        log::error!("Server failed to start: {e}");
        std::process::exit(1);
    }

    log::info!("Windowgate stopped");

    Ok(())
}

fn serve_config(args: &Args, config: Config, shutdown_signal: CancellationToken) -> ServeConfig {
    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 8000)));

    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
    }
}

async fn cancel_on_ctrl_c(shutdown_signal: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for the shutdown signal: {e}");
        return;
    }

    log::info!("Shutdown requested, finishing in-flight requests");
    shutdown_signal.cancel();
}
