//! Configuration for the bridge, directory, and chat account

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::directory::default_directory_path;
use crate::inbox::DEFAULT_INBOX_CAPACITY;
use crate::queue::DEFAULT_QUEUE_SIZE;
use crate::received_log::DEFAULT_RECEIVED_LOG_CAPACITY;
use crate::retry::{RetryConfig, duration_secs};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub xmpp: XmppConfig,
    pub bridge: BridgeConfig,
    pub directory: DirectoryConfig,
    /// Backoff for the initial connect and other one-off operations
    pub retry: RetryConfig,
    /// Backoff for re-establishing a dropped connection
    pub reconnect: ReconnectConfig,
    /// Whether the config was loaded from the default location
    #[serde(skip)]
    pub is_from_default_location: bool,
}

/// Chat account settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XmppConfig {
    pub jid: Option<String>,
    #[serde(skip_serializing, default = "default_secret")]
    pub password: SecretString,
    pub auto_reconnect: bool,
}

fn default_secret() -> SecretString {
    SecretString::new(String::new())
}

impl Default for XmppConfig {
    fn default() -> Self {
        Self {
            jid: None,
            password: default_secret(),
            auto_reconnect: true,
        }
    }
}

/// Capacities and timings of the bridge loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub queue_size: usize,
    pub inbox_capacity: usize,
    pub received_log_capacity: usize,
    /// How long an enqueue may wait on a full channel
    #[serde(with = "duration_secs")]
    pub enqueue_timeout: Duration,
    /// Idle poll interval of the pump loops
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    /// How long `stop` waits for the loops before aborting them
    #[serde(with = "duration_secs")]
    pub shutdown_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            received_log_capacity: DEFAULT_RECEIVED_LOG_CAPACITY,
            enqueue_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Directory file location and search tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub path: Option<PathBuf>,
    /// Minimum fuzzy score (0-100) for a query hit
    pub fuzzy_threshold: u8,
    pub max_results: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            fuzzy_threshold: 60,
            max_results: 10,
        }
    }
}

impl DirectoryConfig {
    /// Configured path, or the default location
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_directory_path)
    }
}

/// Reconnection backoff, defaulting to longer delays than [`RetryConfig`]
///
/// Fields missing from the file fall back to [`RetryConfig::reconnect`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ReconnectConfig(pub RetryConfig);

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self(RetryConfig::reconnect())
    }
}

impl<'de> Deserialize<'de> for ReconnectConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let overrides = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut merged = serde_json::to_value(RetryConfig::reconnect()).map_err(D::Error::custom)?;
        if let Some(base) = merged.as_object_mut() {
            base.extend(overrides);
        }
        serde_json::from_value(merged)
            .map(Self)
            .map_err(D::Error::custom)
    }
}

impl std::ops::Deref for ReconnectConfig {
    type Target = RetryConfig;

    fn deref(&self) -> &RetryConfig {
        &self.0
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the bridge cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.queue_size == 0 {
            return Err(ConfigError::Invalid("bridge.queue_size must be > 0".into()));
        }
        if self.bridge.inbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bridge.inbox_capacity must be > 0".into(),
            ));
        }
        if self.directory.fuzzy_threshold > 100 {
            return Err(ConfigError::Invalid(
                "directory.fuzzy_threshold must be within 0..=100".into(),
            ));
        }
        if self.directory.max_results == 0 {
            return Err(ConfigError::Invalid(
                "directory.max_results must be > 0".into(),
            ));
        }
        for (name, retry) in [("retry", &self.retry), ("reconnect", &*self.reconnect)] {
            if !(retry.backoff_multiplier.is_finite() && retry.backoff_multiplier >= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{}.backoff_multiplier must be >= 1.0",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Default configuration file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("jabber-mcp").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".jabber-mcp/config.toml"))
}

/// Load configuration from the default location or specified path
///
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let (path, is_default) = match path {
        Some(p) => (p.to_path_buf(), false),
        None => (default_config_path(), true),
    };

    let mut config = if path.exists() {
        Config::from_file(&path)?
    } else {
        Config::default()
    };
    config.is_from_default_location = is_default;
    config.validate()?;
    Ok(config)
}

/// Save configuration, creating the parent directory if needed
pub fn save_config(config: &Config, path: Option<&Path>) -> Result<(), ConfigError> {
    let path = path.map(PathBuf::from).unwrap_or_else(default_config_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    config.to_file(&path)
}
