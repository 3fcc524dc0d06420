//! Windowgate configuration structures to map the windowgate.toml configuration.

#![deny(missing_docs)]

mod loader;
mod rate_limit;
mod server;

use std::path::Path;

pub use rate_limit::*;
use serde::Deserialize;
pub use server::{HealthConfig, ServerConfig, TlsServerConfig};

/// Main configuration structure for the Windowgate application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates settings serde cannot check, returning warnings for suspicious but usable ones.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        loader::validate(self)
    }
}
