//! Startup configuration from `<config dir>/padcast/config.toml`.
//!
//! Everything here is a startup default. Dispatch mode and rate stay runtime
//! toggles on the operator console.

use crate::scheduler::TickMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "padcast";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "padcast".to_string(),
            topic_prefix: "padcast".to_string(),
            keep_alive_secs: 5,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    #[default]
    Refresh,
    Fixed,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    pub frequency_hz: f64,
    pub refresh_hz: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Refresh,
            frequency_hz: 120.0,
            refresh_hz: 60.0,
        }
    }
}

impl DispatchConfig {
    pub fn tick_mode(&self) -> TickMode {
        match self.mode {
            DispatchMode::Refresh => TickMode::Refresh {
                hz: self.refresh_hz,
            },
            DispatchMode::Fixed => TickMode::Fixed {
                hz: self.frequency_hz,
            },
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    pub status_poll_ms: u64,
    pub session_refresh_ms: u64,
    pub connected_hold_ms: u64,
    pub recreate_delay_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            status_poll_ms: 1000,
            session_refresh_ms: 2000,
            connected_hold_ms: 1000,
            recreate_delay_ms: 2000,
        }
    }
}

impl PollingConfig {
    pub fn status_poll(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms.max(1))
    }

    pub fn session_refresh(&self) -> Duration {
        Duration::from_millis(self.session_refresh_ms.max(1))
    }

    pub fn connected_hold(&self) -> Duration {
        Duration::from_millis(self.connected_hold_ms)
    }

    pub fn recreate_delay(&self) -> Duration {
        Duration::from_millis(self.recreate_delay_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct KeyboardConfig {
    /// evdev node, e.g. `/dev/input/event3`
    pub device: Option<PathBuf>,
    /// Exclusive access; only sensible for a keyboard not used for the console.
    pub grab: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub broker: BrokerConfig,
    pub dispatch: DispatchConfig,
    pub polling: PollingConfig,
    pub keyboard: KeyboardConfig,
}

fn get_config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    })
}

impl ClientConfig {
    pub fn default_path() -> PathBuf {
        let mut path = get_config_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the config at the default location, writing defaults first if
    /// there is none yet.
    pub async fn load_or_default() -> Result<Self, ConfigError> {
        Self::load_or_create(&Self::default_path()).await
    }

    pub async fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::ReadError {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            info!("Creating default configuration at {}", path.display());
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source,
                })?;
        let config: Self = toml::from_str(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await.map_err(write_error)?;
        Ok(())
    }
}
