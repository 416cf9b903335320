//! Configuration management for tunconf.
//!
//! Settings are read from a TOML file, validated, then overridden by
//! `TUNCONF_`-prefixed environment variables.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "TUNCONF_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] io::Error),

    /// Error parsing TOML configuration
    #[error("Failed to parse TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Error serializing configuration to TOML
    #[error("Failed to serialize config to TOML: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    /// Missing required configuration value
    #[error("Missing required configuration value: {0}")]
    MissingValue(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    FileNotFound(PathBuf),
}

/// Bounds of the get-configuration retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExchangeConfig {
    /// First buffer size tried when no size hint is known (default: 512)
    #[serde(default = "default_initial_get_size")]
    pub initial_get_size: usize,

    /// Exchange calls allowed per fetch (default: 8)
    #[serde(default = "default_max_get_attempts")]
    pub max_get_attempts: u32,

    /// Largest buffer a fetch will allocate (default: 32 MiB)
    #[serde(default = "default_max_get_size")]
    pub max_get_size: usize,
}

fn default_initial_get_size() -> usize {
    512
}

fn default_max_get_attempts() -> u32 {
    8
}

fn default_max_get_size() -> usize {
    32 * 1024 * 1024
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            initial_get_size: default_initial_get_size(),
            max_get_attempts: default_max_get_attempts(),
            max_get_size: default_max_get_size(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Also write logs to a daily rolling file (default: false)
    #[serde(default)]
    pub log_to_file: bool,

    /// Directory for log files (default: "./logs")
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Emit JSON lines instead of human-readable text (default: false)
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_to_file: false,
            log_dir: default_log_dir(),
            json_format: false,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Log level (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Driver exchange settings
    #[serde(default)]
    pub exchange: ExchangeConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            exchange: ExchangeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Config::default()
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.validate()?;

        // Environment wins over the file
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load from the default path, falling back to defaults when no file
    /// exists there
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::load(Self::default_path()) {
            Err(ConfigError::FileNotFound(_)) => {
                let mut config = Config::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
            other => other,
        }
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "log_level".to_string(),
                message: format!("must be one of {}", LOG_LEVELS.join(", ")),
            });
        }

        let exchange = &self.exchange;
        if exchange.initial_get_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "exchange.initial_get_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if exchange.initial_get_size > exchange.max_get_size {
            return Err(ConfigError::InvalidValue {
                key: "exchange.initial_get_size".to_string(),
                message: format!(
                    "must not exceed exchange.max_get_size ({})",
                    exchange.max_get_size
                ),
            });
        }
        if exchange.max_get_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "exchange.max_get_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.logging.log_to_file && self.logging.log_dir.trim().is_empty() {
            return Err(ConfigError::MissingValue(
                "logging.log_dir must be set when logging.log_to_file=true".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides (prefix: TUNCONF_)
    /// Example keys:
    /// - TUNCONF_LOG_LEVEL
    /// - TUNCONF_EXCHANGE_INITIAL_GET_SIZE, TUNCONF_EXCHANGE_MAX_GET_ATTEMPTS,
    ///   TUNCONF_EXCHANGE_MAX_GET_SIZE
    /// - TUNCONF_LOGGING_LOG_TO_FILE, TUNCONF_LOGGING_LOG_DIR, TUNCONF_LOGGING_JSON_FORMAT
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok());
    }

    /// Apply overrides from `lookup`, which receives keys without the prefix.
    /// Values that do not parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse_bool(s: &str) -> Option<bool> {
            match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" => Some(true),
                "false" | "0" | "no" | "n" => Some(false),
                _ => None,
            }
        }

        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v.trim().to_ascii_lowercase();
        }

        // Exchange
        if let Some(n) = lookup("EXCHANGE_INITIAL_GET_SIZE").and_then(|v| v.parse().ok()) {
            self.exchange.initial_get_size = n;
        }
        if let Some(n) = lookup("EXCHANGE_MAX_GET_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.exchange.max_get_attempts = n;
        }
        if let Some(n) = lookup("EXCHANGE_MAX_GET_SIZE").and_then(|v| v.parse().ok()) {
            self.exchange.max_get_size = n;
        }

        // Logging
        if let Some(b) = lookup("LOGGING_LOG_TO_FILE").and_then(|v| parse_bool(&v)) {
            self.logging.log_to_file = b;
        }
        if let Some(v) = lookup("LOGGING_LOG_DIR") {
            if !v.is_empty() {
                self.logging.log_dir = v;
            }
        }
        if let Some(b) = lookup("LOGGING_JSON_FORMAT").and_then(|v| parse_bool(&v)) {
            self.logging.json_format = b;
        }
    }

    /// Reload configuration from the same file it was loaded from
    pub fn reload(&mut self, path: &Path) -> Result<(), ConfigError> {
        *self = Self::load(path)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("tunconf").join("config.toml")
        } else {
            PathBuf::from("config.toml")
        }
    }
}
