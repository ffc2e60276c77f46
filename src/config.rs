//! Configuration module
//!
//! This module handles the pool policy knobs and their loading from TOML
//! files, with environment variable overrides for container deployments.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::types::duration_ms;

/// Default idle lifetime before an unused connection is reclaimed
fn default_idle_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Default per-host cap on retained idle connections
fn default_max_idle() -> usize {
    4
}

/// Default per-host cap on total connections (idle + pending + leased)
fn default_max_total() -> usize {
    16
}

/// Default bound on a single connection attempt
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Pool policy configuration
///
/// All knobs are per-host: a pool talking to ten endpoints may hold up to
/// `max_total` connections for each of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// How long a connection may sit idle before it is torn down
    #[serde(with = "duration_ms", default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    /// Maximum number of idle connections retained per host
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// Maximum number of total connections per host; once reached, new
    /// requests queue until a connection frees up or their timeout fires
    #[serde(default = "default_max_total")]
    pub max_total: usize,

    /// Time limit for a single outbound connection attempt
    #[serde(with = "duration_ms", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            max_idle: default_max_idle(),
            max_total: default_max_total(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl PoolConfig {
    /// Validate configuration for correctness
    ///
    /// Checks for:
    /// - Zero durations (idle_timeout, connect_timeout)
    /// - Zero connection caps
    /// - max_idle exceeding max_total
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout.is_zero() {
            return Err(anyhow::anyhow!("idle_timeout must be > 0"));
        }
        if self.connect_timeout.is_zero() {
            return Err(anyhow::anyhow!("connect_timeout must be > 0"));
        }
        if self.max_idle == 0 {
            return Err(anyhow::anyhow!("max_idle must be > 0"));
        }
        if self.max_total == 0 {
            return Err(anyhow::anyhow!("max_total must be > 0"));
        }
        if self.max_idle > self.max_total {
            return Err(anyhow::anyhow!(
                "max_idle ({}) cannot exceed max_total ({})",
                self.max_idle,
                self.max_total
            ));
        }
        Ok(())
    }
}

/// Apply `SOCKPOOL_*` environment variable overrides to a config
///
/// Recognized variables:
/// - `SOCKPOOL_IDLE_TIMEOUT_MS`
/// - `SOCKPOOL_MAX_IDLE`
/// - `SOCKPOOL_MAX_TOTAL`
/// - `SOCKPOOL_CONNECT_TIMEOUT_MS`
///
/// Unparseable values are ignored with a warning rather than failing the
/// load, so a typo in one variable cannot take a deployment down.
fn apply_env_overrides(config: &mut PoolConfig) {
    fn parsed(name: &str) -> Option<u64> {
        let raw = std::env::var(name).ok()?;
        match raw.parse::<u64>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("ignoring unparseable {}={:?}", name, raw);
                None
            }
        }
    }

    if let Some(ms) = parsed("SOCKPOOL_IDLE_TIMEOUT_MS") {
        config.idle_timeout = Duration::from_millis(ms);
        tracing::info!("idle_timeout overridden from environment: {}ms", ms);
    }
    if let Some(n) = parsed("SOCKPOOL_MAX_IDLE") {
        config.max_idle = n as usize;
        tracing::info!("max_idle overridden from environment: {}", n);
    }
    if let Some(n) = parsed("SOCKPOOL_MAX_TOTAL") {
        config.max_total = n as usize;
        tracing::info!("max_total overridden from environment: {}", n);
    }
    if let Some(ms) = parsed("SOCKPOOL_CONNECT_TIMEOUT_MS") {
        config.connect_timeout = Duration::from_millis(ms);
        tracing::info!("connect_timeout overridden from environment: {}ms", ms);
    }
}

/// Load configuration from a TOML file, with environment variable overrides
///
/// Environment variables take precedence over the file so container
/// deployments can tune a pool without editing the config it ships with.
pub fn load_config(config_path: &str) -> Result<PoolConfig> {
    let config_content = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", config_path, e))?;

    let mut config: PoolConfig = toml::from_str(&config_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", config_path, e))?;

    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}
