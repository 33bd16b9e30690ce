//! Configuration for fragments

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::kv::Backend;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fragments")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for the sled database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Which key-value backend holds fragments
    #[serde(default)]
    pub backend: Backend,

    /// Interface to bind the HTTP API on
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Public base URL used for `Location` headers.
    /// Falls back to the request's `Host` header when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Largest accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Basic auth credentials, email -> password
    #[serde(default)]
    pub users: BTreeMap<String, String>,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            backend: Backend::default(),
            bind_host: default_bind_host(),
            http_port: default_http_port(),
            api_url: None,
            max_body_bytes: default_max_body_bytes(),
            users: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get the sled database path
    pub fn metadata_db_path(&self) -> PathBuf {
        self.storage_dir.join("fragments.sled")
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }
}
