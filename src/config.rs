//! Configuration loading and management.
//!
//! Loads switchboard configuration from `./switchboard.toml` (or
//! `$SWITCHBOARD_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::reconnect::ReconnectPolicy;

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service-level settings.
    pub service: ServiceConfig,
    /// Database location.
    pub storage: StorageConfig,
    /// Reconnection and connect-throttle tuning.
    pub reconnect: ReconnectConfig,
    /// Embedded protocol runtime endpoint.
    pub embedded: EmbeddedConfig,
    /// Remote gateway endpoint and credentials.
    pub gateway: GatewayConfig,
    /// Webhook delivery and diagnostics tuning.
    pub dispatch: DispatchConfig,
}

/// Service-level settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for rotated JSON log files.
    pub logs_dir: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            logs_dir: "logs".to_owned(),
        }
    }
}

/// Database location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file path.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "switchboard.db".to_owned(),
        }
    }
}

/// Reconnection and connect-throttle tuning.
///
/// The connect-throttle cooldown equals `base_ms`: a manual connect is
/// allowed no more often than the first scheduled retry would fire.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First-retry delay and unit of the exponential schedule (ms).
    pub base_ms: u64,
    /// Upper bound for the exponential schedule (ms).
    pub cap_ms: u64,
    /// Fast-schedule attempts before the extended cooldown.
    pub max_attempts: u32,
    /// Extended cooldown after the fast schedule is exhausted (ms).
    pub extended_cooldown_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_ms: 30_000,
            cap_ms: 120_000,
            max_attempts: 3,
            extended_cooldown_ms: 600_000,
        }
    }
}

impl ReconnectConfig {
    /// The policy object consumed by instances.
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(self.base_ms),
            cap: Duration::from_millis(self.cap_ms),
            max_attempts: self.max_attempts,
            extended_cooldown: Duration::from_millis(self.extended_cooldown_ms),
        }
    }

    /// Cooldown between manual connect attempts.
    pub fn connect_cooldown(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }
}

/// Embedded protocol runtime endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddedConfig {
    /// Base URL of the local protocol runtime.
    pub runtime_url: String,
}

impl Default for EmbeddedConfig {
    fn default() -> Self {
        Self {
            runtime_url: "http://127.0.0.1:3001".to_owned(),
        }
    }
}

/// Remote gateway endpoint and credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the gateway service.
    pub base_url: String,
    /// Account-level token sent as `Client-Token` on every request.
    pub client_token: Option<String>,
    /// Country code prefixed onto targets that lack one.
    pub default_country_code: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gateway.example.com".to_owned(),
            client_token: None,
            default_country_code: Some("55".to_owned()),
        }
    }
}

/// Webhook delivery and diagnostics tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-delivery request timeout (seconds).
    pub timeout_secs: u64,
    /// Capacity of the in-memory delivery log.
    pub log_ring_capacity: usize,
    /// Pause between targets in a bulk send (ms).
    pub bulk_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            log_ring_capacity: 200,
            bulk_delay_ms: 2000,
        }
    }
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$SWITCHBOARD_CONFIG_PATH` or `./switchboard.toml`.
    /// A missing file falls back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_path(None)
    }

    /// Like [`load`](Self::load) with an explicit file path taking precedence
    /// over `$SWITCHBOARD_CONFIG_PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load_path(path: Option<&std::path::Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path_with(|key| std::env::var(key).ok()),
        };
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("failed to read config file: {e}")),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML document without env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error when the document is not valid TOML for this schema.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }

    /// Resolve the config file path from a custom env resolver.
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("SWITCHBOARD_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("switchboard.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests can inject values without touching
    /// the process environment. Invalid numeric overrides are ignored with a
    /// warning.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("SWITCHBOARD_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Some(v) = env("SWITCHBOARD_LOG_LEVEL") {
            self.service.log_level = v;
        }
        if let Some(v) = env("SWITCHBOARD_EMBEDDED_URL") {
            self.embedded.runtime_url = v;
        }
        if let Some(v) = env("SWITCHBOARD_GATEWAY_URL") {
            self.gateway.base_url = v;
        }
        if let Some(v) = env("SWITCHBOARD_GATEWAY_CLIENT_TOKEN") {
            self.gateway.client_token = Some(v);
        }

        Self::override_u64(&env, "SWITCHBOARD_RECONNECT_BASE_MS", &mut self.reconnect.base_ms);
        Self::override_u64(&env, "SWITCHBOARD_RECONNECT_CAP_MS", &mut self.reconnect.cap_ms);
        Self::override_u32(
            &env,
            "SWITCHBOARD_MAX_RECONNECT_ATTEMPTS",
            &mut self.reconnect.max_attempts,
        );
        Self::override_u64(
            &env,
            "SWITCHBOARD_EXTENDED_COOLDOWN_MS",
            &mut self.reconnect.extended_cooldown_ms,
        );
        Self::override_u64(&env, "SWITCHBOARD_DISPATCH_TIMEOUT_SECS", &mut self.dispatch.timeout_secs);
        Self::override_usize(
            &env,
            "SWITCHBOARD_LOG_RING_CAPACITY",
            &mut self.dispatch.log_ring_capacity,
        );
    }

    fn override_u64(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut u64) {
        if let Some(v) = env(key) {
            match v.parse() {
                Ok(n) => *slot = n,
                Err(_) => tracing::warn!(var = key, value = %v, "ignoring invalid env override"),
            }
        }
    }

    fn override_u32(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut u32) {
        if let Some(v) = env(key) {
            match v.parse() {
                Ok(n) => *slot = n,
                Err(_) => tracing::warn!(var = key, value = %v, "ignoring invalid env override"),
            }
        }
    }

    fn override_usize(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut usize) {
        if let Some(v) = env(key) {
            match v.parse() {
                Ok(n) => *slot = n,
                Err(_) => tracing::warn!(var = key, value = %v, "ignoring invalid env override"),
            }
        }
    }
}
