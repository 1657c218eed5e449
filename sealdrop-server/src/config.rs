//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SEALDROP_CONFIG)
//! 3. Environment variables
//! 4. The port file, if present, for the listening port

use sealdrop_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Protocol configuration.
    pub protocol: ProtocolConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SEALDROP_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.storage.apply_env_overrides();
        self.protocol.apply_env_overrides();
        self.metrics.apply_env_overrides();
    }

    /// Checks values that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol.max_payload_mb == 0 {
            return Err(ConfigError::ValidationError(
                "protocol.max_payload_mb must be at least 1".to_string(),
            ));
        }
        if self.protocol.max_payload_mb > 4095 {
            return Err(ConfigError::ValidationError(
                "protocol.max_payload_mb must fit a 32-bit payload size".to_string(),
            ));
        }
        if self.network.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// File whose first line names the listening port.
    pub port_file: Option<PathBuf>,
    /// Idle connection timeout in seconds (0 = never).
    pub idle_timeout_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            port_file: Some(PathBuf::from("port.info")),
            idle_timeout_secs: 0,
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("SEALDROP_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(path) = std::env::var("SEALDROP_PORT_FILE") {
            self.port_file = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Ok(timeout) = std::env::var("SEALDROP_IDLE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.idle_timeout_secs = secs;
            }
        }

        if let Ok(max) = std::env::var("SEALDROP_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }

    /// Returns the idle timeout, or `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Returns the address to listen on, taking the port from the port file
    /// when it exists and holds a valid port.
    pub fn listen_addr(&self) -> SocketAddr {
        let mut addr = self.bind_addr;
        let Some(path) = self.port_file.as_deref() else {
            return addr;
        };
        match read_port_file(path) {
            Ok(Some(port)) => addr.set_port(port),
            Ok(None) => {
                tracing::debug!(
                    "Port file {} not found, using port {}",
                    path.display(),
                    addr.port()
                );
            }
            Err(reason) => {
                tracing::warn!(
                    "Ignoring port file {}: {}; using port {}",
                    path.display(),
                    reason,
                    addr.port()
                );
            }
        }
        addr
    }
}

/// Reads the first line of a port file. `Ok(None)` if the file is absent.
fn read_port_file(path: &Path) -> Result<Option<u16>, String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };
    let line = content.lines().next().unwrap_or("").trim();
    match line.parse::<u16>() {
        Ok(0) => Err("port 0 is not allowed".to_string()),
        Ok(port) => Ok(Some(port)),
        Err(_) => Err(format!("invalid port {:?}", line)),
    }
}

/// Registry backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// SQLite database under the data directory.
    Sqlite,
    /// In-memory maps; nothing survives a restart.
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory.
    pub data_dir: PathBuf,
    /// Registry backend.
    pub backend: StorageBackend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            backend: StorageBackend::Sqlite,
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("SEALDROP_DATA") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(backend) = std::env::var("SEALDROP_STORAGE_BACKEND") {
            match backend.to_lowercase().as_str() {
                "sqlite" => self.backend = StorageBackend::Sqlite,
                "memory" => self.backend = StorageBackend::Memory,
                other => tracing::warn!("Unknown storage backend '{}', keeping default", other),
            }
        }
    }

    /// Returns the database file path.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("server.db")
    }

    /// Returns the root directory for uploaded files.
    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }
}

/// Protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest accepted request payload in megabytes.
    pub max_payload_mb: u32,
    /// Send RegistrationFail before closing on a rejected registration.
    pub reply_registration_failure: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_payload_mb: 16,
            reply_registration_failure: false,
        }
    }
}

impl ProtocolConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("SEALDROP_MAX_PAYLOAD_MB") {
            if let Ok(mb) = size.parse() {
                self.max_payload_mb = mb;
            }
        }

        if let Ok(reply) = std::env::var("SEALDROP_REPLY_REGISTRATION_FAILURE") {
            self.reply_registration_failure = reply == "1" || reply.to_lowercase() == "true";
        }
    }

    /// Returns the maximum payload size in bytes.
    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_mb.saturating_mul(1024 * 1024)
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("SEALDROP_METRICS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(addr) = std::env::var("SEALDROP_METRICS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde helpers for SocketAddr (kept as a string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
