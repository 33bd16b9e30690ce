//! Two-level key-value storage
//!
//! Every backend maps `primary key -> secondary key -> value` where values
//! are opaque byte buffers. Fragments use the owner id as the primary key
//! and the fragment id as the secondary key.
//!
//! ## Backends
//!
//! | Backend | Durability | Use |
//! |---------|------------|-----|
//! | [`MemoryDb`] | process lifetime | development, tests |
//! | [`SledDb`] | on disk | single-node deployments |
//!
//! The contract is async for every backend, so a networked store can be
//! dropped in later without touching callers.

pub mod memory;
pub mod sled_db;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::error::FragmentError;

pub use memory::MemoryDb;
pub use sled_db::SledDb;

/// Two-level associative store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store `value` at `(primary, secondary)`, replacing any existing value.
    ///
    /// Both keys must be non-empty.
    async fn put(&self, primary: &str, secondary: &str, value: Bytes) -> Result<(), FragmentError>;

    /// Fetch the value at `(primary, secondary)`, `None` when absent
    async fn get(&self, primary: &str, secondary: &str) -> Result<Option<Bytes>, FragmentError>;

    /// All values under `primary` in insertion order
    async fn query(&self, primary: &str) -> Result<Vec<Bytes>, FragmentError>;

    /// Remove the value at `(primary, secondary)`.
    ///
    /// Fails with [`FragmentError::NotFound`] when nothing is stored there.
    async fn del(&self, primary: &str, secondary: &str) -> Result<(), FragmentError>;

    /// Persist buffered writes. A no-op for backends without buffering.
    async fn flush(&self) -> Result<(), FragmentError> {
        Ok(())
    }
}

/// Reject empty keys before they reach a backend
pub(crate) fn validate_keys(primary: &str, secondary: &str) -> Result<(), FragmentError> {
    if primary.is_empty() || secondary.is_empty() {
        return Err(FragmentError::InvalidKey(format!(
            "primaryKey and secondaryKey strings are required, got primaryKey={:?}, secondaryKey={:?}",
            primary, secondary
        )));
    }
    Ok(())
}

pub(crate) fn missing_entry(primary: &str, secondary: &str) -> FragmentError {
    FragmentError::NotFound(format!(
        "missing entry for primaryKey={} and secondaryKey={}",
        primary, secondary
    ))
}

/// Which storage backend the process instantiates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Sled,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Memory => write!(f, "memory"),
            Backend::Sled => write!(f, "sled"),
        }
    }
}

impl FromStr for Backend {
    type Err = FragmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" | "dev" => Ok(Backend::Memory),
            "sled" | "disk" => Ok(Backend::Sled),
            _ => Err(FragmentError::Config(format!(
                "Invalid backend '{}'. Valid options: memory, sled",
                s
            ))),
        }
    }
}

/// The metadata and data stores a fragment store is built from
pub struct StorePair {
    pub metadata: Arc<dyn KeyValueStore>,
    pub data: Arc<dyn KeyValueStore>,
}

/// Open the two stores selected by the config
pub fn open_stores(config: &Config) -> Result<StorePair, FragmentError> {
    match config.backend {
        Backend::Memory => {
            info!("Using in-memory fragment storage");
            Ok(StorePair {
                metadata: Arc::new(MemoryDb::new()),
                data: Arc::new(MemoryDb::new()),
            })
        }
        Backend::Sled => {
            let path = config.metadata_db_path();
            let db = sled::open(&path)?;
            info!(path = %path.display(), "Opened sled fragment storage");
            Ok(StorePair {
                metadata: Arc::new(SledDb::open_tree(&db, "metadata")?),
                data: Arc::new(SledDb::open_tree(&db, "data")?),
            })
        }
    }
}
