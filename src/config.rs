//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field has a default, so the monitor runs without a
//! configuration file and a file only needs the values it changes.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{MonitorError, Result};
use crate::link::mavlink_link::LinkSettings;
use crate::link::ConnectionUrl;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Telemetry link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,

    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    #[serde(default = "default_gcs_system_id")]
    pub system_id: u8,

    #[serde(default = "default_gcs_component_id")]
    pub component_id: u8,
}

/// Startup handshake configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HandshakeConfig {
    /// Seconds to wait for a system, 0 waits forever
    #[serde(default)]
    pub timeout_s: u64,
}

/// Calibration session configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CalibrationConfig {
    #[serde(default = "default_start_session")]
    pub start_session: bool,
}

/// Operator output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_format")]
    pub format: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub file_enabled: bool,

    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_name")]
    pub name: String,
}

// Default value functions
fn default_scheme() -> String { "udpin".to_string() }
fn default_address() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 14550 }
fn default_heartbeat_timeout_ms() -> u64 { 3000 }
fn default_gcs_system_id() -> u8 { 245 }
fn default_gcs_component_id() -> u8 { 190 }

fn default_start_session() -> bool { true }

fn default_output_format() -> String { "text".to_string() }

fn default_log_level() -> String { "info".to_string() }
fn default_log_dir() -> String { "logs".to_string() }
fn default_log_name() -> String { "compass_calibration".to_string() }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            address: default_address(),
            port: default_port(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            system_id: default_gcs_system_id(),
            component_id: default_gcs_component_id(),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self { timeout_s: 0 }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { start_session: default_start_session() }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { format: default_output_format() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_enabled: false,
            dir: default_log_dir(),
            name: default_log_name(),
        }
    }
}

impl LinkConfig {
    /// Connection URL built from scheme, address and port
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Connection`] if the parts do not form a valid URL
    pub fn connection_url(&self) -> Result<ConnectionUrl> {
        ConnectionUrl::new(&self.scheme, &self.address, self.port)
    }

    pub fn settings(&self) -> LinkSettings {
        LinkSettings {
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            system_id: self.system_id,
            component_id: self.component_id,
        }
    }
}

impl HandshakeConfig {
    /// Handshake timeout, `None` to wait forever
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_s > 0).then(|| Duration::from_secs(self.timeout_s))
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mag_cal_monitor::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// The connection URL parts are checked when connecting, so an invalid
    /// address surfaces as a connection error.
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.link.heartbeat_timeout_ms == 0 || self.link.heartbeat_timeout_ms > 60000 {
            return Err(MonitorError::Config(
                toml::de::Error::custom("heartbeat_timeout_ms must be between 1 and 60000")
            ));
        }

        if self.link.system_id == 0 {
            return Err(MonitorError::Config(
                toml::de::Error::custom("system_id must be between 1 and 255")
            ));
        }

        if self.handshake.timeout_s > 86400 {
            return Err(MonitorError::Config(
                toml::de::Error::custom("handshake timeout_s must be at most 86400 (0 waits forever)")
            ));
        }

        if !["text", "jsonl"].contains(&self.output.format.as_str()) {
            return Err(MonitorError::Config(
                toml::de::Error::custom("output format must be one of: text, jsonl")
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(MonitorError::Config(
                toml::de::Error::custom("logging level cannot be empty")
            ));
        }

        if self.logging.file_enabled && (self.logging.dir.is_empty() || self.logging.name.is_empty()) {
            return Err(MonitorError::Config(
                toml::de::Error::custom("logging dir and name cannot be empty when file logging is enabled")
            ));
        }

        if self.logging.name.contains('/') {
            return Err(MonitorError::Config(
                toml::de::Error::custom("logging name cannot contain '/'")
            ));
        }

        Ok(())
    }
}
