//! Persisted connection configuration.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{DEFAULT_PORT, LOOPBACK_HOST};

/// Errors from loading or saving the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which transport variant carries the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    DirectHost,
    TunnelClient,
    TunnelServer,
    WifiClient,
    #[default]
    Auto,
}

impl ConnectionMode {
    /// Resolves `Auto` to the tunnel client, the most broadly compatible
    /// variant. Other modes are returned unchanged.
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto => Self::TunnelClient,
            other => other,
        }
    }
}

/// Per-variant timeouts, stored in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionTimeouts {
    pub connect_ms: u64,
    pub read_ms: u64,
    pub accept_ms: u64,
    pub usb_ms: u64,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            read_ms: 30_000,
            accept_ms: 60_000,
            usb_ms: pcex_protocol::constants::USB_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SessionTimeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub fn accept(&self) -> Duration {
        Duration::from_millis(self.accept_ms)
    }

    pub fn usb(&self) -> Duration {
        Duration::from_millis(self.usb_ms)
    }
}

/// Connection settings.
///
/// Ports are kept as `u32` so out-of-range values survive a round trip
/// through storage and are rejected when the session connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub mode: ConnectionMode,
    pub tunnel_host: String,
    pub tunnel_port: u32,
    pub server_port: u32,
    pub wifi_host: String,
    pub wifi_port: u32,
    pub client_identity: String,
    pub timeouts: SessionTimeouts,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Auto,
            tunnel_host: LOOPBACK_HOST.into(),
            tunnel_port: DEFAULT_PORT.into(),
            server_port: DEFAULT_PORT.into(),
            wifi_host: String::new(),
            wifi_port: DEFAULT_PORT.into(),
            client_identity: pcex_protocol::constants::CLIENT_IDENTITY.into(),
            timeouts: SessionTimeouts::default(),
        }
    }
}

/// Source of the persisted [`ConnectionConfig`].
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<ConnectionConfig, ConfigError>;
    fn save(&self, config: &ConnectionConfig) -> Result<(), ConfigError>;
}

/// Configuration kept in a JSON file. A missing file yields the defaults.
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the default location under the platform config dir.
    pub fn open_default() -> Option<Self> {
        default_config_path().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> Result<ConnectionConfig, ConfigError> {
        if !self.path.exists() {
            return Ok(ConnectionConfig::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let config: ConnectionConfig = serde_json::from_str(&data)?;
        debug!(mode = ?config.mode, "loaded connection config from {:?}", self.path);
        Ok(config)
    }

    fn save(&self, config: &ConnectionConfig) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(config)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!(mode = ?config.mode, "persisted connection config to {:?}", self.path);
        Ok(())
    }
}

/// Non-persistent store, for tests and embedders that manage settings
/// themselves.
#[derive(Default)]
pub struct MemoryConfigStore {
    config: RwLock<ConnectionConfig>,
}

impl MemoryConfigStore {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<ConnectionConfig, ConfigError> {
        Ok(self.config.read().unwrap().clone())
    }

    fn save(&self, config: &ConnectionConfig) -> Result<(), ConfigError> {
        *self.config.write().unwrap() = config.clone();
        Ok(())
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("pcex").join("connection.json"))
}

/// Returns the platform-specific config directory.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    }
}
