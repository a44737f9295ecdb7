//! Configuration management for the PeerDrop client.
//!
//! This module provides TOML-based configuration file loading.
//! The default configuration path is `~/.config/peerdrop/client.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{CHUNK_SIZE, HIGH_WATER_MARK};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default rendezvous service URL.
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8080";

/// Largest accepted chunk size (256 KiB).
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("signaling_url must be a ws:// or wss:// URL, got {0}")]
    InvalidSignalingUrl(String),

    #[error("chunk_size must be between 1 and 262144 bytes, got {0}")]
    InvalidChunkSize(usize),

    #[error("high_water_mark ({high_water_mark}) must be at least chunk_size ({chunk_size})")]
    InvalidHighWaterMark {
        high_water_mark: usize,
        chunk_size: usize,
    },

    #[error("{name} must be greater than 0")]
    ZeroInterval { name: &'static str },

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("summarize.endpoint must be an http(s) URL when summarization is enabled")]
    MissingSummarizerEndpoint,

    #[error("invalid ICE server {url}: {reason}")]
    InvalidIceServer { url: String, reason: &'static str },
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General client settings.
    pub client: ClientConfig,

    /// Rendezvous and peer connection settings.
    pub network: NetworkConfig,

    /// Transfer tuning.
    pub transfer: TransferConfig,

    /// Optional content summarization.
    pub summarize: SummarizeConfig,
}

/// General client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Rendezvous and peer connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Rendezvous service URL.
    pub signaling_url: String,

    /// STUN server URLs used for connectivity candidates.
    pub stun_servers: Vec<String>,

    /// Interval between WebSocket pings to the rendezvous service.
    pub heartbeat_interval_secs: u64,

    /// TURN relays for peers that cannot reach each other directly.
    pub turn_servers: Vec<TurnServerConfig>,
}

/// A TURN relay and its long-term credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnServerConfig {
    /// `turn:` or `turns:` URL.
    pub url: String,
    pub username: String,
    pub credential: String,
}

/// Transfer tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes of file content per data frame.
    pub chunk_size: usize,

    /// Pending-send byte count above which the sender pauses.
    pub high_water_mark: usize,

    /// Delay between pending-send checks while paused, in milliseconds.
    pub poll_interval_ms: u64,

    /// Minimum interval between rate recomputations, in milliseconds.
    pub progress_interval_ms: u64,

    /// Directory received files are written to.
    pub download_dir: PathBuf,
}

/// Optional content summarization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummarizeConfig {
    /// Whether to annotate outgoing files with a description.
    pub enabled: bool,

    /// Summarization endpoint URL.
    pub endpoint: Option<String>,

    /// Number of leading file bytes sent for summarization.
    pub prefix_bytes: usize,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            heartbeat_interval_secs: 30,
            turn_servers: Vec::new(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            high_water_mark: HIGH_WATER_MARK,
            poll_interval_ms: 10,
            progress_interval_ms: 500,
            download_dir: default_download_dir(),
        }
    }
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            prefix_bytes: 4096,
            timeout_secs: 10,
        }
    }
}

impl NetworkConfig {
    /// Heartbeat interval as a duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl TransferConfig {
    /// Flow-control poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Progress sampling interval as a duration.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("peerdrop")
        .join("client.toml")
}

/// Returns the default directory for received files.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("peerdrop")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - PEERDROP_SIGNALING_URL: Override the rendezvous service URL
    /// - PEERDROP_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PEERDROP_SIGNALING_URL") {
            if !url.is_empty() {
                tracing::info!(signaling_url = %url, "Overriding signaling_url from environment");
                self.network.signaling_url = url;
            }
        }

        if let Ok(level) = std::env::var("PEERDROP_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!(log_level = %level, "Overriding log_level from environment");
                self.client.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match Url::parse(&self.network.signaling_url) {
            Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
            _ => {
                return Err(ConfigError::InvalidSignalingUrl(
                    self.network.signaling_url.clone(),
                ))
            }
        }

        for url in &self.network.stun_servers {
            if !(url.starts_with("stun:") || url.starts_with("stuns:")) {
                return Err(ConfigError::InvalidIceServer {
                    url: url.clone(),
                    reason: "expected a stun: or stuns: URL",
                });
            }
        }
        for turn in &self.network.turn_servers {
            if !(turn.url.starts_with("turn:") || turn.url.starts_with("turns:")) {
                return Err(ConfigError::InvalidIceServer {
                    url: turn.url.clone(),
                    reason: "expected a turn: or turns: URL",
                });
            }
            if turn.username.is_empty() || turn.credential.is_empty() {
                return Err(ConfigError::InvalidIceServer {
                    url: turn.url.clone(),
                    reason: "TURN relays need a username and credential",
                });
            }
        }

        let transfer = &self.transfer;
        if transfer.chunk_size == 0 || transfer.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidChunkSize(transfer.chunk_size));
        }

        if transfer.high_water_mark < transfer.chunk_size {
            return Err(ConfigError::InvalidHighWaterMark {
                high_water_mark: transfer.high_water_mark,
                chunk_size: transfer.chunk_size,
            });
        }

        if transfer.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "poll_interval_ms",
            });
        }
        if transfer.progress_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "progress_interval_ms",
            });
        }
        if self.network.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval {
                name: "heartbeat_interval_secs",
            });
        }

        let level = self.client.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.client.log_level.clone()));
        }

        if self.summarize.enabled {
            let endpoint_ok = self
                .summarize
                .endpoint
                .as_deref()
                .and_then(|e| Url::parse(e).ok())
                .is_some_and(|url| matches!(url.scheme(), "http" | "https"));
            if !endpoint_ok {
                return Err(ConfigError::MissingSummarizerEndpoint);
            }
            if self.summarize.timeout_secs == 0 {
                return Err(ConfigError::ZeroInterval {
                    name: "summarize.timeout_secs",
                });
            }
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

        assert_eq!(config.network.signaling_url, "ws://127.0.0.1:8080");
        assert_eq!(config.network.heartbeat_interval_secs, 30);
        assert_eq!(config.transfer.chunk_size, 16384);
        assert_eq!(config.transfer.high_water_mark, 16 * 1024 * 1024);
        assert_eq!(config.transfer.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.transfer.progress_interval(), Duration::from_millis(500));
        assert!(config.transfer.download_dir.ends_with("peerdrop"));
        assert!(!config.summarize.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[network]
signaling_url = "wss://drop.example.com"

[transfer]
chunk_size = 65536
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.network.signaling_url, "wss://drop.example.com");
        assert_eq!(config.transfer.chunk_size, 65536);
        assert_eq!(config.transfer.poll_interval_ms, 10);
        assert_eq!(config.client.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let err = Config::from_toml("[transfer\nchunk_size = 1").unwrap_err();
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_roundtrip() {
        let mut original = Config::default();
        original.transfer.download_dir = PathBuf::from("/tmp/incoming");
        original.summarize.enabled = true;
        original.summarize.endpoint = Some("http://127.0.0.1:9000/summarize".to_string());

        let toml = original.to_toml().unwrap();
        assert!(toml.contains("[network]"));
        assert!(toml.contains("[summarize]"));
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
        let path = temp_dir.path().join("client.toml");
        std::fs::write(&path, "[transfer]\npoll_interval_ms = 25\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.transfer.poll_interval_ms, 25);
    }

    #[test]
    fn test_validate_signaling_url() {
        let mut config = Config::default();
        config.network.signaling_url = "http://127.0.0.1:8080".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSignalingUrl(_))
        ));

        config.network.signaling_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSignalingUrl(_))
        ));
    }

    #[test]
    fn test_turn_servers_from_toml() {
        let toml = r#"
[network]
stun_servers = []

[[network.turn_servers]]
url = "turns:relay.example.com:5349"
username = "drop"
credential = "secret"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert!(config.network.stun_servers.is_empty());
        assert_eq!(
            config.network.turn_servers,
            vec![TurnServerConfig {
                url: "turns:relay.example.com:5349".to_string(),
                username: "drop".to_string(),
                credential: "secret".to_string(),
            }]
        );
        assert!(config.validate().is_ok());
        assert_eq!(Config::from_toml(&config.to_toml().unwrap()).unwrap(), config);
    }

    #[test]
    fn test_validate_ice_servers() {
        let mut config = Config::default();
        config.network.stun_servers = vec!["turn:relay.example.com".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIceServer { .. })
        ));

        config.network.stun_servers.clear();
        config.network.turn_servers = vec![TurnServerConfig {
            url: "stun:relay.example.com".to_string(),
            username: "drop".to_string(),
            credential: "secret".to_string(),
        }];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIceServer { .. })
        ));

        config.network.turn_servers[0].url = "turn:relay.example.com".to_string();
        config.network.turn_servers[0].credential.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIceServer { .. })
        ));

        config.network.turn_servers[0].credential = "secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_chunk_size() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidChunkSize(0)));

        config.transfer.chunk_size = MAX_CHUNK_SIZE + 1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidChunkSize(MAX_CHUNK_SIZE + 1))
        );
    }

    #[test]
    fn test_validate_high_water_mark() {
        let mut config = Config::default();
        config.transfer.high_water_mark = 1024;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidHighWaterMark {
                high_water_mark: 1024,
                chunk_size: 16384,
            })
        );
    }

    #[test]
    fn test_validate_zero_intervals() {
        let mut config = Config::default();
        config.transfer.poll_interval_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroInterval {
                name: "poll_interval_ms"
            })
        );

        let mut config = Config::default();
        config.network.heartbeat_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroInterval { .. })
        ));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.client.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_summarizer_endpoint() {
        let mut config = Config::default();
        config.summarize.enabled = true;
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingSummarizerEndpoint)
        );

        config.summarize.endpoint = Some("ftp://example.com".to_string());
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingSummarizerEndpoint)
        );

        config.summarize.endpoint = Some("https://example.com/summarize".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("peerdrop/client.toml"));
    }

    #[test]
    #[serial]
    fn test_env_override_signaling_url() {
        std::env::set_var("PEERDROP_SIGNALING_URL", "wss://relay.example.com");
        std::env::remove_var("PEERDROP_LOG_LEVEL");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.network.signaling_url, "wss://relay.example.com");
        assert_eq!(config.client.log_level, "info");

        std::env::remove_var("PEERDROP_SIGNALING_URL");
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::remove_var("PEERDROP_SIGNALING_URL");
        std::env::set_var("PEERDROP_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.client.log_level, "debug");

        std::env::remove_var("PEERDROP_LOG_LEVEL");
    }
}
