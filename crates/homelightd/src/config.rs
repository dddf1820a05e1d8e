//! Configuration file parsing and structures.
//!
//! homelightd uses a single TOML file. The bridge and API sections are always
//! required; optional integrations (e.g. the HomeKit exporter) are enabled by
//! the presence of their section under `[integrations]`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build a per-target filter from the default level and the overrides
    pub fn filter(&self) -> Targets {
        self.overrides
            .iter()
            .fold(Targets::new().with_default(self.level), |targets, (target, level)| {
                targets.with_target(target.clone(), *level)
            })
    }
}

/// Whether the process runs against real lights or is being developed on.
#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Production,
    Development,
}

/// System-wide configuration
#[derive(Debug, Default, Deserialize)]
pub struct SystemConfig {
    /// In development mode the lights are left alone when the bridge connects
    #[serde(default)]
    pub mode: Mode,
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8565
}

fn default_repository_url() -> String {
    "https://github.com/grumpyoldman-io/HomeAutomationServer".to_string()
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Target of the redirect served on `/`
    #[serde(default = "default_repository_url")]
    pub repository_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            repository_url: default_repository_url(),
        }
    }
}

fn default_state_file() -> PathBuf {
    PathBuf::from("stored-state.json")
}

/// Lighting bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Hostname or IP address of the bridge
    pub host: String,

    /// Whitelisted bridge username
    pub user: String,

    /// Where snapshots of light state are kept between restarts
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

/// Integration configuration container
#[derive(Debug, Default, Deserialize)]
pub struct IntegrationsConfig {
    /// Accessory bridge exporter
    #[serde(default)]
    pub homekit: Option<HomeKitConfig>,
}

fn default_homekit_port() -> u16 {
    47128
}

fn default_broker_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "homekit".to_string()
}

/// Accessory bridge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HomeKitConfig {
    /// Display name of the bridge
    pub name: String,

    /// Device identifier, formatted as a MAC address
    pub mac_address: String,

    /// Pairing code, formatted as `XXX-XX-XXX`
    pub pin: String,

    /// Port the accessory server listens on
    #[serde(default = "default_homekit_port")]
    pub port: u16,

    /// MQTT broker hostname or IP address
    pub broker: String,

    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    /// MQTT client ID, derived from the hostname when unset
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.host.is_empty() || self.bridge.user.is_empty() {
            return Err(ConfigError::Invalid(
                "Incorrect bridge host / user".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
