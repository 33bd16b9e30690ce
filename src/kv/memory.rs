//! In-memory key-value backend

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::{missing_entry, validate_keys, KeyValueStore};
use crate::error::FragmentError;

/// Entries for one primary key, kept in insertion order
type Partition = Vec<(String, Bytes)>;

/// Process-local store
///
/// Each operation takes the lock once, so per-key operations are atomic.
#[derive(Default)]
pub struct MemoryDb {
    db: RwLock<HashMap<String, Partition>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryDb {
    async fn put(&self, primary: &str, secondary: &str, value: Bytes) -> Result<(), FragmentError> {
        validate_keys(primary, secondary)?;

        let mut db = self.db.write().await;
        let partition = db.entry(primary.to_string()).or_default();
        match partition.iter_mut().find(|(key, _)| key == secondary) {
            Some(entry) => entry.1 = value,
            None => partition.push((secondary.to_string(), value)),
        }

        debug!(primary = %primary, secondary = %secondary, "memory put");
        Ok(())
    }

    async fn get(&self, primary: &str, secondary: &str) -> Result<Option<Bytes>, FragmentError> {
        let db = self.db.read().await;
        Ok(db
            .get(primary)
            .and_then(|partition| partition.iter().find(|(key, _)| key == secondary))
            .map(|(_, value)| value.clone()))
    }

    async fn query(&self, primary: &str) -> Result<Vec<Bytes>, FragmentError> {
        let db = self.db.read().await;
        Ok(db
            .get(primary)
            .map(|partition| partition.iter().map(|(_, value)| value.clone()).collect())
            .unwrap_or_default())
    }

    async fn del(&self, primary: &str, secondary: &str) -> Result<(), FragmentError> {
        let mut db = self.db.write().await;
        let partition = db
            .get_mut(primary)
            .ok_or_else(|| missing_entry(primary, secondary))?;
        let index = partition
            .iter()
            .position(|(key, _)| key == secondary)
            .ok_or_else(|| missing_entry(primary, secondary))?;
        partition.remove(index);

        if partition.is_empty() {
            db.remove(primary);
        }

        debug!(primary = %primary, secondary = %secondary, "memory del");
        Ok(())
    }
}
