//! Configuration management for Gatehouse.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use crate::error::{GatehouseError, Result};
use crate::ratelimit::DEFAULT_SWEEP_INTERVAL_MS;

/// Prefix for environment overrides, e.g. `GATEHOUSE__SERVER__LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "GATEHOUSE";

/// Main configuration for the Gatehouse service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatehouseConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the route policy file. Built-in policies are used when unset.
    #[serde(default)]
    pub policy_path: Option<String>,

    /// Policy file reload interval in seconds, 0 disables reloading
    #[serde(default = "default_reload_interval")]
    pub policy_reload_interval_secs: u64,

    /// Interval between expired-window sweeps in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            policy_path: None,
            policy_reload_interval_secs: default_reload_interval(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

fn default_reload_interval() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL_MS
}

impl GatehouseConfig {
    /// Load configuration from an optional YAML file layered under
    /// `GATEHOUSE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: GatehouseConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rate_limiting.sweep_interval_ms == 0 {
            return Err(GatehouseError::Config(
                "rate_limiting.sweep_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
