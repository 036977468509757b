//! Configuration management for the conductor client.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/conductor-client/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must start with ws:// or wss://, got {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("default_timeout_ms must be between 1 and 600000, got {0}")]
    InvalidTimeout(u64),

    #[error("expiry_window_secs must be between 1 and 3600, got {0}")]
    InvalidExpiryWindow(u64),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Default admin interface URL.
pub const DEFAULT_ADMIN_URL: &str = "ws://localhost:65000";

/// Default app interface URL.
pub const DEFAULT_APP_URL: &str = "ws://localhost:65001";

/// Main configuration structure for the conductor client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Where and how to connect.
    pub connection: ConnectionConfig,

    /// Zome call signing settings.
    pub signing: SigningConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// URL of the conductor admin interface.
    pub admin_url: String,

    /// URL of a conductor app interface.
    pub app_url: String,

    /// `Origin` header sent on the WebSocket handshake.
    pub origin: Option<String>,

    /// Per-request timeout in milliseconds.
    pub default_timeout_ms: u64,
}

/// Signing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SigningConfig {
    /// How long a signed zome call stays valid.
    pub expiry_window_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            admin_url: DEFAULT_ADMIN_URL.to_string(),
            app_url: DEFAULT_APP_URL.to_string(),
            origin: None,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            expiry_window_secs: 300, // 5 minutes
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conductor-client")
        .join("config.toml")
}

impl ClientConfig {
    /// Per-request timeout.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.default_timeout_ms)
    }

    /// Validity window of signed zome calls.
    pub fn expiry_window(&self) -> Duration {
        Duration::from_secs(self.signing.expiry_window_secs)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - CONDUCTOR_ADMIN_URL: Override admin interface URL
    /// - CONDUCTOR_APP_URL: Override app interface URL
    /// - CONDUCTOR_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CONDUCTOR_ADMIN_URL") {
            if !url.is_empty() {
                tracing::info!("Overriding admin_url from environment: {}", url);
                self.connection.admin_url = url;
            }
        }

        if let Ok(url) = std::env::var("CONDUCTOR_APP_URL") {
            if !url.is_empty() {
                tracing::info!("Overriding app_url from environment: {}", url);
                self.connection.app_url = url;
            }
        }

        if let Ok(level) = std::env::var("CONDUCTOR_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.logging.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("admin_url", &self.connection.admin_url),
            ("app_url", &self.connection.app_url),
        ] {
            let valid = url::Url::parse(value)
                .map(|url| matches!(url.scheme(), "ws" | "wss") && url.has_host())
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::InvalidUrl {
                    field,
                    value: value.clone(),
                });
            }
        }

        let timeout = self.connection.default_timeout_ms;
        if !(1..=600_000).contains(&timeout) {
            return Err(ConfigError::InvalidTimeout(timeout));
        }

        let window = self.signing.expiry_window_secs;
        if !(1..=3600).contains(&window) {
            return Err(ConfigError::InvalidExpiryWindow(window));
        }

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        Ok(())
    }

    /// Read the config at `path`. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text)
                .with_context(|| format!("config file {} is invalid", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("cannot read config file {}", path.display())),
        }
    }

    /// [`ClientConfig::load`] from [`default_config_path`].
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| anyhow::anyhow!(describe_toml_error(text, &e)))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("cannot encode config as TOML")
    }

    /// Write the config to `path`, creating missing parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = self.to_toml()?;

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create config directory {}", dir.display()))?;
        }
        fs::write(path, text)
            .with_context(|| format!("cannot write config file {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Config saved");
        Ok(())
    }
}

/// `toml` reports byte offsets; point at the line and column instead.
fn describe_toml_error(text: &str, error: &toml::de::Error) -> String {
    let Some(span) = error.span() else {
        return format!("bad TOML: {}", error.message());
    };
    let before = &text[..span.start.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.len() - before.rfind('\n').map_or(0, |i| i + 1) + 1;
    format!("bad TOML at line {line}, column {column}: {}", error.message())
}
