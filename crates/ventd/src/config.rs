//! Configuration file parsing and structures.
//!
//! ventd uses TOML for declarative configuration. Each integration has its
//! own optional table; leaving a table out disables that integration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Telemetry channel (MQTT) configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,

    /// Vent servo controller configuration
    #[serde(default)]
    pub servo: Option<ServoConfig>,

    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
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

    /// Per-target level overrides, e.g. "rumqttc" = "warn"
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "ventd".to_string()
}

/// Telemetry channel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// MQTT broker hostname or IP address
    pub broker: String,

    /// MQTT broker port
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// MQTT client ID
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic the device publishes sensor readings on
    pub topic: String,

    /// Optional username for authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password for authentication
    #[serde(default)]
    pub password: Option<String>,
}

fn default_servo_timeout() -> u64 {
    5
}

/// Vent servo controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServoConfig {
    /// Base URL of the controller, e.g. "http://192.168.4.1:5000"
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_servo_timeout")]
    pub timeout_secs: u64,
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,

    /// Listen address, e.g. "127.0.0.1:8080"
    #[serde(default = "default_api_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_api_bind(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let mut config: Config = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that serde cannot express
    fn validate(&mut self) -> Result<(), ConfigError> {
        if let Some(telemetry) = &self.telemetry {
            if telemetry.broker.is_empty() {
                return Err(ConfigError::Invalid("telemetry.broker must not be empty"));
            }
            if telemetry.topic.is_empty() {
                return Err(ConfigError::Invalid("telemetry.topic must not be empty"));
            }
        }

        if let Some(servo) = &mut self.servo {
            if servo.base_url.is_empty() {
                return Err(ConfigError::Invalid("servo.base_url must not be empty"));
            }
            // Request paths are appended verbatim, so strip trailing slashes.
            while servo.base_url.ends_with('/') {
                servo.base_url.pop();
            }
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
    Invalid(&'static str),
}
