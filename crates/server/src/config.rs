//! Configuration management for the PeerDrop rendezvous server.
//!
//! This module provides TOML-based configuration file loading.
//! The default configuration path is `~/.config/peerdrop/server.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::DEFAULT_MAX_CODE_ATTEMPTS;

/// Default listen address for the rendezvous service.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Default inbound signaling frame limit in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default number of messages queued per connection before it is dropped.
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 256;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_addr must be a socket address like 0.0.0.0:8080, got {0}")]
    InvalidBindAddr(String),

    #[error("max_message_size must be between 1024 and 16777216 bytes, got {0}")]
    InvalidMaxMessageSize(usize),

    #[error("outbound_queue_size must be greater than 0")]
    InvalidOutboundQueueSize,

    #[error("max_code_attempts must be greater than 0, got {0}")]
    InvalidMaxCodeAttempts(usize),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the rendezvous server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener and logging settings.
    pub server: ServerConfig,

    /// Room allocation settings.
    pub rooms: RoomsConfig,
}

/// Listener and logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the signaling listener binds to.
    pub bind_addr: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Largest inbound signaling message accepted, in bytes.
    pub max_message_size: usize,

    /// Messages buffered for a connection before it is considered stalled
    /// and disconnected.
    pub outbound_queue_size: usize,
}

/// Room allocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoomsConfig {
    /// Bound on regenerating a colliding room code.
    pub max_code_attempts: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            log_level: "info".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            max_code_attempts: DEFAULT_MAX_CODE_ATTEMPTS,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("peerdrop")
        .join("server.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - PEERDROP_BIND_ADDR: Override the listen address
    /// - PEERDROP_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("PEERDROP_BIND_ADDR") {
            if !addr.is_empty() {
                tracing::info!(bind_addr = %addr, "Overriding bind_addr from environment");
                self.server.bind_addr = addr;
            }
        }

        if let Ok(level) = std::env::var("PEERDROP_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!(log_level = %level, "Overriding log_level from environment");
                self.server.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddr(self.server.bind_addr.clone()));
        }

        if !(1024..=16 * 1024 * 1024).contains(&self.server.max_message_size) {
            return Err(ConfigError::InvalidMaxMessageSize(
                self.server.max_message_size,
            ));
        }

        if self.server.outbound_queue_size == 0 {
            return Err(ConfigError::InvalidOutboundQueueSize);
        }

        if self.rooms.max_code_attempts == 0 {
            return Err(ConfigError::InvalidMaxCodeAttempts(
                self.rooms.max_code_attempts,
            ));
        }

        let level = self.server.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.server.max_message_size, 65536);
        assert_eq!(config.rooms.max_code_attempts, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
bind_addr = "127.0.0.1:9000"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.rooms.max_code_attempts, 1000);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[server\nbind_addr = 1");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[rooms]
max_code_attempts = "many"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut original = Config::default();
        original.server.log_level = "debug".to_string();
        original.rooms.max_code_attempts = 10;

        let toml = original.to_toml().unwrap();
        assert!(toml.contains("[server]"));
        assert!(toml.contains("[rooms]"));
        assert_eq!(Config::from_toml(&toml).unwrap(), original);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("server.toml");
        std::fs::write(&path, "[server]\nmax_message_size = 2048\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.max_message_size, 2048);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("server.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let err = format!("{:#}", Config::load(&path).unwrap_err());
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_validate_bind_addr() {
        let mut config = Config::default();
        config.server.bind_addr = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBindAddr("localhost".to_string()))
        );
    }

    #[test]
    fn test_validate_max_message_size() {
        let mut config = Config::default();
        config.server.max_message_size = 10;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMaxMessageSize(10))
        );
    }

    #[test]
    fn test_validate_outbound_queue_size() {
        let mut config = Config::default();
        assert_eq!(config.server.outbound_queue_size, 256);

        config.server.outbound_queue_size = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidOutboundQueueSize)
        );
    }

    #[test]
    fn test_validate_max_code_attempts() {
        let mut config = Config::default();
        config.rooms.max_code_attempts = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMaxCodeAttempts(0))
        );
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.server.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.server.log_level = "loud".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("peerdrop/server.toml"));
    }

    #[test]
    #[serial]
    fn test_env_override_bind_addr() {
        std::env::set_var("PEERDROP_BIND_ADDR", "127.0.0.1:7000");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.bind_addr, "127.0.0.1:7000");

        std::env::remove_var("PEERDROP_BIND_ADDR");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("PEERDROP_BIND_ADDR", "");
        std::env::remove_var("PEERDROP_LOG_LEVEL");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());

        std::env::remove_var("PEERDROP_BIND_ADDR");
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::remove_var("PEERDROP_BIND_ADDR");
        std::env::set_var("PEERDROP_LOG_LEVEL", "trace");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.log_level, "trace");

        std::env::remove_var("PEERDROP_LOG_LEVEL");
    }
}
