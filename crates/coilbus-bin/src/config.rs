// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration file loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file (YAML, TOML or JSON by extension)
//! 2. Resolve `${VAR}` and `${VAR:default}` placeholders
//! 3. Parse into [`CoilbusConfig`]
//! 4. Apply environment variable overrides
//! 5. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! COILBUS_PORT=/dev/ttyUSB0
//! COILBUS_BAUD_RATE=115200
//! COILBUS_ADDRESS=7
//! COILBUS_MONITOR_INTERVAL=2s
//! ```
//!
//! # Example
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! address = 1
//!
//! [timing]
//! read_timeout = "1s"
//!
//! [discovery]
//! last_address = 32
//!
//! [monitor]
//! interval = "2s"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use coilbus_rtu::{
    DeviceAddress, DiscoveryConfig, Framing, MonitorConfig, RetryConfig, RtuConfig, TimingConfig,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "COILBUS";

/// Config file looked up when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "coilbus.toml";

// =============================================================================
// ConfigError
// =============================================================================

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file does not exist.
    #[error("Configuration file not found: {}", path.display())]
    FileNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The content could not be parsed.
    #[error("Failed to parse {}: {message}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Parsing failed outside a file.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Parser message.
        message: String,
    },

    /// Unknown file extension.
    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// An override variable holds an invalid value.
    #[error("Invalid environment variable {name}: {reason}")]
    InvalidEnvVar {
        /// Variable name.
        name: String,
        /// What was expected.
        reason: String,
    },

    /// The parsed configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] coilbus_rtu::RtuError),
}

impl ConfigError {
    fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    fn invalid_env_var(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Schema
// =============================================================================

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoilbusConfig {
    /// Serial link and device address.
    #[serde(default)]
    pub serial: SerialConfig,

    /// Transaction timing.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Connect retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Discovery search space.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Health monitor.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// `[serial]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port path. Required by every command that talks to a device.
    #[serde(default)]
    pub port: Option<String>,

    /// Line speed.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Device address.
    #[serde(default)]
    pub address: DeviceAddress,

    /// Line framing.
    #[serde(default)]
    pub framing: Framing,
}

fn default_baud_rate() -> u32 {
    115200
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            address: DeviceAddress::default(),
            framing: Framing::default(),
        }
    }
}

impl CoilbusConfig {
    /// Validates every section that does not depend on the port.
    pub fn validate(&self) -> ConfigResult<()> {
        if !coilbus_rtu::SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(coilbus_rtu::RtuError::configuration(
                coilbus_rtu::ConfigurationError::InvalidBaudRate {
                    baud_rate: self.serial.baud_rate,
                },
            )
            .into());
        }
        self.timing.validate()?;
        self.discovery.validate()?;
        Ok(())
    }

    /// Port path, or an error naming the missing setting.
    pub fn port(&self) -> ConfigResult<&str> {
        self.serial
            .port
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                coilbus_rtu::RtuError::configuration(
                    coilbus_rtu::ConfigurationError::missing_field("serial.port"),
                )
                .into()
            })
    }

    /// Link configuration for [`coilbus_rtu::RtuClient`].
    pub fn rtu_config(&self) -> ConfigResult<RtuConfig> {
        let config = RtuConfig::builder()
            .port(self.port()?)
            .baud_rate(self.serial.baud_rate)
            .framing(self.serial.framing)
            .address(self.serial.address)
            .timing(self.timing.clone())
            .build()?;
        Ok(config)
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads [`CoilbusConfig`] from files.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader with the `COILBUS` prefix.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholders and overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads configuration from a file.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<CoilbusConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = self.read_file(path)?;
        let format = ConfigFormat::from_path(path)?;
        let config = self.parse_content(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        debug!(port = ?config.serial.port, baud_rate = config.serial.baud_rate, "Configuration loaded");
        Ok(config)
    }

    /// Loads `path` if given, else `coilbus.toml` if present, else defaults.
    ///
    /// Environment overrides apply in every case.
    pub fn load_or_default(&self, path: Option<&Path>) -> ConfigResult<CoilbusConfig> {
        match path {
            Some(path) => self.load(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => self.load(DEFAULT_CONFIG_FILE),
            None => {
                debug!("No configuration file, using defaults");
                let mut config = CoilbusConfig::default();
                if self.resolve_env_vars {
                    self.apply_env_overrides(&mut config)?;
                }
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Parses configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<CoilbusConfig> {
        self.parse_content(content, format)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn parse_content(&self, content: &str, format: ConfigFormat) -> ConfigResult<CoilbusConfig> {
        let content = if self.resolve_env_vars {
            resolve_env_placeholders(content)
        } else {
            content.to_string()
        };

        let mut config: CoilbusConfig = parse_str(&content, format)?;
        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn var(&self, name: &str) -> (String, Option<String>) {
        let key = format!("{}_{}", self.env_prefix, name);
        let value = env::var(&key).ok();
        (key, value)
    }

    fn apply_env_overrides(&self, config: &mut CoilbusConfig) -> ConfigResult<()> {
        if let (_, Some(value)) = self.var("PORT") {
            config.serial.port = Some(value);
        }
        if let (key, Some(value)) = self.var("BAUD_RATE") {
            config.serial.baud_rate = value
                .parse()
                .map_err(|_| ConfigError::invalid_env_var(key, "expected a baud rate"))?;
        }
        if let (key, Some(value)) = self.var("ADDRESS") {
            let address: u8 = value
                .parse()
                .map_err(|_| ConfigError::invalid_env_var(&key, "expected an address 1-247"))?;
            config.serial.address = DeviceAddress::new(address)
                .map_err(|_| ConfigError::invalid_env_var(key, "expected an address 1-247"))?;
        }
        if let (key, Some(value)) = self.var("MONITOR_INTERVAL") {
            config.monitor.interval = humantime::parse_duration(&value)
                .map_err(|e| ConfigError::invalid_env_var(key, e.to_string()))?;
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::UnsupportedFormat(other.to_string())),
            None => Err(ConfigError::UnsupportedFormat("(no extension)".to_string())),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => parse_yaml(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML goes through the `config` crate.
fn parse_yaml<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = ::config::Config::builder()
        .add_source(::config::File::from_str(content, ::config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

/// Replaces `${VAR}` and `${VAR:default}` with environment values.
///
/// Unknown variables without a default are kept verbatim.
fn resolve_env_placeholders(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' || chars.peek() != Some(&'{') {
            result.push(c);
            continue;
        }
        chars.next();

        let mut var_content = String::new();
        let mut found_close = false;
        for c in chars.by_ref() {
            if c == '}' {
                found_close = true;
                break;
            }
            var_content.push(c);
        }

        if !found_close {
            result.push_str("${");
            result.push_str(&var_content);
            continue;
        }

        let (var_name, default_value) = match var_content.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (var_content.as_str(), None),
        };

        match (env::var(var_name), default_value) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => {
                warn!("Environment variable '{}' not found", var_name);
                result.push_str(&format!("${{{}}}", var_name));
            }
        }
    }

    result
}

// =============================================================================
// Tests
// =============================================================================
