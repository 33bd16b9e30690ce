//! Fragment-shaped operations over two key-value stores
//!
//! Metadata records and raw data live in separate stores, both addressed by
//! `(owner_id, id)`. Metadata is stored as JSON so that a networked backend
//! sees exactly what the in-process one does.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::FragmentError;
use crate::kv::{KeyValueStore, MemoryDb, StorePair};

/// Metadata as it crosses the storage boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentRecord {
    pub id: String,
    pub owner_id: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
}

/// Result of listing an owner's fragments
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FragmentList {
    /// Fragment ids only
    Ids(Vec<String>),
    /// Full metadata records
    Expanded(Vec<FragmentRecord>),
}

impl FragmentList {
    pub fn len(&self) -> usize {
        match self {
            FragmentList::Ids(ids) => ids.len(),
            FragmentList::Expanded(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids in listing order, whichever form the list has
    pub fn ids(&self) -> Vec<&str> {
        match self {
            FragmentList::Ids(ids) => ids.iter().map(String::as_str).collect(),
            FragmentList::Expanded(records) => records.iter().map(|r| r.id.as_str()).collect(),
        }
    }
}

pub(crate) fn fragment_not_found(owner_id: &str, id: &str) -> FragmentError {
    FragmentError::NotFound(format!(
        "Fragment with id {} for ownerId {} not found",
        id, owner_id
    ))
}

/// Owner of all physical fragment storage
#[derive(Clone)]
pub struct FragmentStore {
    metadata: Arc<dyn KeyValueStore>,
    data: Arc<dyn KeyValueStore>,
}

impl FragmentStore {
    pub fn new(metadata: Arc<dyn KeyValueStore>, data: Arc<dyn KeyValueStore>) -> Self {
        Self { metadata, data }
    }

    pub fn from_pair(pair: StorePair) -> Self {
        Self::new(pair.metadata, pair.data)
    }

    /// Fresh store backed by two empty in-memory databases
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryDb::new()), Arc::new(MemoryDb::new()))
    }

    fn decode(raw: &[u8]) -> Result<FragmentRecord, FragmentError> {
        serde_json::from_slice(raw).map_err(|e| {
            FragmentError::Serialization(format!("Invalid fragment metadata: {}", e))
        })
    }

    /// Write a fragment's metadata
    pub async fn write_fragment(&self, record: &FragmentRecord) -> Result<(), FragmentError> {
        let serialized = serde_json::to_vec(record)?;
        debug!(owner = %record.owner_id, id = %record.id, "Writing fragment metadata");
        self.metadata
            .put(&record.owner_id, &record.id, Bytes::from(serialized))
            .await
    }

    /// Read a fragment's metadata, `None` if nothing is stored
    pub async fn read_fragment(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<FragmentRecord>, FragmentError> {
        match self.metadata.get(owner_id, id).await? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write a fragment's data buffer
    pub async fn write_fragment_data(
        &self,
        owner_id: &str,
        id: &str,
        data: Bytes,
    ) -> Result<(), FragmentError> {
        debug!(owner = %owner_id, id = %id, size = data.len(), "Writing fragment data");
        self.data.put(owner_id, id, data).await
    }

    /// Read a fragment's data buffer, `None` if never written
    pub async fn read_fragment_data(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<Bytes>, FragmentError> {
        self.data.get(owner_id, id).await
    }

    /// List an owner's fragments, as ids or as full records
    pub async fn list_fragments(
        &self,
        owner_id: &str,
        expand: bool,
    ) -> Result<FragmentList, FragmentError> {
        let records = self
            .metadata
            .query(owner_id)
            .await?
            .iter()
            .map(|raw| Self::decode(raw))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(owner = %owner_id, count = records.len(), expand, "Listed fragments");

        if expand {
            Ok(FragmentList::Expanded(records))
        } else {
            Ok(FragmentList::Ids(records.into_iter().map(|r| r.id).collect()))
        }
    }

    /// Delete a fragment's metadata and data as one unit.
    ///
    /// Fails with `NotFound` when there is no metadata at the address. A
    /// fragment whose data was never set is still deletable. Both deletes
    /// run concurrently; if only one of them succeeds, the removed entry is
    /// written back before the error is returned.
    pub async fn delete_fragment(&self, owner_id: &str, id: &str) -> Result<(), FragmentError> {
        let metadata = self
            .metadata
            .get(owner_id, id)
            .await?
            .ok_or_else(|| fragment_not_found(owner_id, id))?;
        let data = self.data.get(owner_id, id).await?;

        let delete_data = async {
            match &data {
                Some(_) => self.data.del(owner_id, id).await,
                None => Ok(()),
            }
        };
        let (metadata_result, data_result) =
            tokio::join!(self.metadata.del(owner_id, id), delete_data);

        match (metadata_result, data_result) {
            (Ok(()), Ok(())) => {
                info!(owner = %owner_id, id = %id, "Deleted fragment");
                Ok(())
            }
            (Ok(()), Err(e)) => {
                warn!(owner = %owner_id, id = %id, error = %e, "Data delete failed, restoring metadata");
                if let Err(restore) = self.metadata.put(owner_id, id, metadata).await {
                    error!(owner = %owner_id, id = %id, error = %restore, "Failed to restore fragment metadata");
                }
                Err(e)
            }
            (Err(e), Ok(())) => {
                if let Some(data) = data {
                    warn!(owner = %owner_id, id = %id, error = %e, "Metadata delete failed, restoring data");
                    if let Err(restore) = self.data.put(owner_id, id, data).await {
                        error!(owner = %owner_id, id = %id, error = %restore, "Failed to restore fragment data");
                    }
                }
                Err(e)
            }
            (Err(e), Err(_)) => Err(e),
        }
    }

    /// Flush both underlying stores
    pub async fn flush(&self) -> Result<(), FragmentError> {
        self.metadata.flush().await?;
        self.data.flush().await
    }
}
