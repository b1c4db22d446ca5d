//! Server configuration
//!
//! Listening address plus the runner settings the compile service is built
//! from.

use bitforge_runner::RunnerConfig;
use std::net::SocketAddr;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to (e.g., "0.0.0.0:8080")
    pub bind_addr: String,

    /// Settings for every compilation run
    pub runner: RunnerConfig,
}

impl ServerConfig {
    /// Creates configuration from environment variables
    ///
    /// - BIND_ADDR (optional, full address; wins over PORT)
    /// - PORT (optional, default: 8080)
    /// - plus every variable read by [`RunnerConfig::from_env`]
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(addr) => addr,
            Err(_) => {
                let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
                format!("0.0.0.0:{}", port)
            }
        };

        Ok(Self {
            bind_addr,
            runner: RunnerConfig::from_env()?,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid bind address '{}': {}", self.bind_addr, e))?;

        self.runner.validate()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            runner: RunnerConfig::default(),
        }
    }
}
