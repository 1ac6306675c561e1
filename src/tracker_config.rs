//! Tracker configuration: an optional TOML file with every field defaulted,
//! followed by environment overrides. The transport token is read from the
//! environment only.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::poller::PollerOptions;
use crate::registry::{DEFAULT_FAILURE_THRESHOLD, RegistryOptions};
use crate::ryanair_client::DEFAULT_RYANAIR_BASE_URL;

pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const CONFIG_PATH_ENV: &str = "FAREWATCH_CONFIG";
const STATE_PATH_ENV: &str = "FAREWATCH_STATE_PATH";
const POLL_INTERVAL_ENV: &str = "FAREWATCH_POLL_INTERVAL_SECS";
const DEFAULT_CONFIG_FILE: &str = "farewatch.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("TELEGRAM_BOT_TOKEN is not set; export the bot token or put it in a .env file")]
    MissingToken,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// JSON file holding the registry
    pub state_path: PathBuf,
    pub poll_interval_secs: u64,
    pub lookup_timeout_secs: u64,
    pub max_concurrent_lookups: usize,
    pub failure_threshold: u32,
    pub notify_on_rise: bool,
    pub notify_timeout_secs: u64,
    /// 0 disables the limit
    pub max_flights_per_owner: usize,
    /// Drop expired flights this many days after they expire; unset keeps them
    pub expired_retention_days: Option<u32>,
    pub currency: String,
    pub ryanair_base_url: String,
    /// Serve Prometheus metrics on this port when set
    pub metrics_port: Option<u16>,
    pub shutdown_grace_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("./farewatch-state.json"),
            poll_interval_secs: 30 * 60,
            lookup_timeout_secs: 20,
            max_concurrent_lookups: 3,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            notify_on_rise: true,
            notify_timeout_secs: 10,
            max_flights_per_owner: 2,
            expired_retention_days: None,
            currency: "EUR".to_string(),
            ryanair_base_url: DEFAULT_RYANAIR_BASE_URL.to_string(),
            metrics_port: None,
            shutdown_grace_secs: 30,
        }
    }
}

impl TrackerConfig {
    /// Parse a TOML file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from the resolved config path (if any), apply environment
    /// overrides, and validate
    pub fn resolve(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path(explicit_path) {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = std::env::var(STATE_PATH_ENV)
            && !path.is_empty()
        {
            self.state_path = PathBuf::from(path);
        }
        if let Ok(value) = std::env::var(POLL_INTERVAL_ENV) {
            self.poll_interval_secs =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv {
                        name: POLL_INTERVAL_ENV,
                        value,
                    })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Zero("poll_interval_secs"));
        }
        if self.lookup_timeout_secs == 0 {
            return Err(ConfigError::Zero("lookup_timeout_secs"));
        }
        if self.max_concurrent_lookups == 0 {
            return Err(ConfigError::Zero("max_concurrent_lookups"));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Zero("failure_threshold"));
        }
        if self.notify_timeout_secs == 0 {
            return Err(ConfigError::Zero("notify_timeout_secs"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn expired_retention(&self) -> Option<chrono::Duration> {
        self.expired_retention_days
            .map(|days| chrono::Duration::days(i64::from(days)))
    }

    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions {
            interval: self.poll_interval(),
            lookup_timeout: self.lookup_timeout(),
            max_concurrent_lookups: self.max_concurrent_lookups,
            notify_on_rise: self.notify_on_rise,
            expired_retention: self.expired_retention(),
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            failure_threshold: self.failure_threshold,
            max_flights_per_owner: self.max_flights_per_owner,
        }
    }
}

/// Resolve the config file path.
///
/// Priority:
/// 1. `--config` argument
/// 2. `FAREWATCH_CONFIG` env var
/// 3. `./farewatch.toml` if it exists
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
        && !path.is_empty()
    {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    local.exists().then_some(local)
}

/// The chat transport credential; absence is fatal at startup
pub fn bot_token() -> Result<String, ConfigError> {
    match std::env::var(BOT_TOKEN_ENV) {
        Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(ConfigError::MissingToken),
    }
}
