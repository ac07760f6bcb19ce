//! Capture proxy configuration settings

use crate::config::upstream::RawProxyConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const LISTEN_ADDR_VAR: &str = "PROXY_LISTEN_ADDR";
pub const LOG_LEVEL_VAR: &str = "RUST_LOG";
pub const REQUEST_TIMEOUT_VAR: &str = "PROXY_REQUEST_TIMEOUT";

/// Free-form options handed to connection handlers, read-only after construction
pub type Options = HashMap<String, serde_json::Value>;

/// Main configuration for the capture proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Server listening address
    pub listen_addr: SocketAddr,

    /// Log level configuration
    pub log_level: String,

    /// Upstream request timeout in seconds
    pub request_timeout: u64,

    /// Explicit upstream proxy configuration; environment fills the gaps
    pub upstream: RawProxyConfig,

    /// Initial scope filter patterns
    pub scopes: Vec<String>,

    /// Additional options passed through to connection handlers
    pub options: Options,

    /// Capture storage configuration
    pub storage: StorageSettings,
}

/// Capture storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One temporary directory per server instance
    Disk,
    /// In-process storage, lost on shutdown
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,

    /// Parent directory for capture directories (system temp dir when unset)
    pub base_dir: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            request_timeout: 30,
            upstream: RawProxyConfig::default(),
            scopes: Vec::new(),
            options: Options::new(),
            storage: StorageSettings::default(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Disk,
            base_dir: None,
        }
    }
}

impl ServerSettings {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config file {}: {}", path.display(), e)))
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from `path` when it exists, defaults otherwise, then
    /// apply environment variable overrides.
    ///
    /// Also returns the overrides that were ignored, so callers can report
    /// them once logging is up.
    pub fn load_config<P: AsRef<Path>>(path: P) -> Result<(Self, Vec<String>)> {
        let mut settings = if path.as_ref().exists() {
            Self::from_yaml_file(path)?
        } else {
            Self::default()
        };
        let ignored = settings.apply_env_overrides();
        Ok((settings, ignored))
    }

    /// Override settings from `PROXY_LISTEN_ADDR`, `RUST_LOG` and `PROXY_REQUEST_TIMEOUT`.
    ///
    /// Invalid values leave the current setting in place and are returned
    /// as messages.
    pub fn apply_env_overrides(&mut self) -> Vec<String> {
        let mut ignored = Vec::new();

        if let Ok(addr_str) = std::env::var(LISTEN_ADDR_VAR) {
            match addr_str.parse() {
                Ok(addr) => self.listen_addr = addr,
                Err(e) => ignored.push(format!("Ignoring invalid {} '{}': {}", LISTEN_ADDR_VAR, addr_str, e)),
            }
        }

        if let Ok(log_level) = std::env::var(LOG_LEVEL_VAR) {
            self.log_level = log_level;
        }

        if let Ok(timeout) = std::env::var(REQUEST_TIMEOUT_VAR) {
            match timeout.parse() {
                Ok(timeout) => self.request_timeout = timeout,
                Err(e) => ignored.push(format!("Ignoring invalid {} '{}': {}", REQUEST_TIMEOUT_VAR, timeout, e)),
            }
        }

        for message in &ignored {
            warn!("{}", message);
        }
        ignored
    }
}
