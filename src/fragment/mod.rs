//! Fragment entity
//!
//! A [`Fragment`] is the validated, in-memory view of one stored fragment.
//! All persistence goes through a [`FragmentStore`]; the entity never owns
//! storage itself.

pub mod store;

pub use store::*;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::convert;
use crate::error::FragmentError;

/// Content types a client may create fragments with
pub const CREATION_TYPES: &[&str] = &["text/plain", "text/plain; charset=utf-8"];

/// Fields for constructing a fragment. Anything left as `None` gets its
/// default: a fresh UUID, the current time, size 0.
#[derive(Debug, Clone, Default)]
pub struct NewFragment {
    pub id: Option<String>,
    pub owner_id: String,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub content_type: String,
    pub size: Option<i64>,
}

impl NewFragment {
    pub fn new(owner_id: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            content_type: content_type.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    id: String,
    owner_id: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    #[serde(rename = "type")]
    content_type: String,
    size: u64,
}

fn parse_media_type(value: &str) -> Result<mime::Mime, FragmentError> {
    value
        .parse::<mime::Mime>()
        .map_err(|e| FragmentError::Validation(format!("Invalid Content-Type {:?}: {}", value, e)))
}

fn validate(owner_id: &str, content_type: &str) -> Result<(), FragmentError> {
    if owner_id.is_empty() {
        return Err(FragmentError::Validation("ownerId is required".to_string()));
    }
    if content_type.is_empty() {
        return Err(FragmentError::Validation("type is required".to_string()));
    }

    let parsed = parse_media_type(content_type)?;
    let essence = parsed.essence_str().to_ascii_lowercase();
    if !convert::is_convertible(&essence) {
        return Err(FragmentError::Validation(format!(
            "Unsupported fragment type: {}",
            content_type
        )));
    }
    Ok(())
}

impl Fragment {
    /// Build a validated fragment
    pub fn new(fields: NewFragment) -> Result<Self, FragmentError> {
        validate(&fields.owner_id, &fields.content_type)?;

        let size = match fields.size {
            Some(size) if size < 0 => {
                return Err(FragmentError::Validation(format!(
                    "size must be a non-negative number, got {}",
                    size
                )))
            }
            Some(size) => size as u64,
            None => 0,
        };

        let id = match fields.id {
            Some(id) if !id.is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };
        let created = fields.created.unwrap_or_else(Utc::now);
        let updated = fields.updated.unwrap_or(created);

        Ok(Self {
            id,
            owner_id: fields.owner_id,
            created,
            updated,
            content_type: fields.content_type,
            size,
        })
    }

    /// Rebuild a live fragment from its stored form
    pub fn from_record(record: FragmentRecord) -> Result<Self, FragmentError> {
        validate(&record.owner_id, &record.content_type)?;
        if record.id.is_empty() {
            return Err(FragmentError::Validation("id is required".to_string()));
        }

        Ok(Self {
            id: record.id,
            owner_id: record.owner_id,
            created: record.created,
            updated: record.updated,
            content_type: record.content_type,
            size: record.size,
        })
    }

    pub fn to_record(&self) -> FragmentRecord {
        FragmentRecord {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            created: self.created,
            updated: self.updated,
            content_type: self.content_type.clone(),
            size: self.size,
        }
    }

    /// All fragments belonging to an owner
    pub async fn by_user(
        store: &FragmentStore,
        owner_id: &str,
        expand: bool,
    ) -> Result<FragmentList, FragmentError> {
        store.list_fragments(owner_id, expand).await
    }

    pub async fn by_id(store: &FragmentStore, owner_id: &str, id: &str) -> Result<Self, FragmentError> {
        let record = store
            .read_fragment(owner_id, id)
            .await?
            .ok_or_else(|| store::fragment_not_found(owner_id, id))?;
        Self::from_record(record)
    }

    /// Remove a fragment's metadata and data
    pub async fn delete(store: &FragmentStore, owner_id: &str, id: &str) -> Result<(), FragmentError> {
        store.delete_fragment(owner_id, id).await
    }

    // `updated` never moves backwards, even if the clock does
    fn next_updated(&self) -> DateTime<Utc> {
        Utc::now().max(self.updated)
    }

    /// Refresh `updated` and persist the metadata. The entity only takes
    /// the new timestamp once the write succeeded.
    pub async fn save(&mut self, store: &FragmentStore) -> Result<(), FragmentError> {
        let mut record = self.to_record();
        record.updated = self.next_updated();
        store.write_fragment(&record).await?;

        self.updated = record.updated;
        debug!(owner = %self.owner_id, id = %self.id, "Saved fragment");
        Ok(())
    }

    /// Stored data, `None` if it was never set
    pub async fn get_data(&self, store: &FragmentStore) -> Result<Option<Bytes>, FragmentError> {
        store.read_fragment_data(&self.owner_id, &self.id).await
    }

    /// Replace the fragment's data and re-save its metadata.
    ///
    /// The data is written first and the metadata second, as two separate
    /// store operations. Between the two, a concurrent reader can see the
    /// new data next to the old `size` and `updated`. If the metadata write
    /// fails the new data stays in place. `size` and `updated` on `self`
    /// change only after both writes went through.
    pub async fn set_data(&mut self, store: &FragmentStore, data: Bytes) -> Result<(), FragmentError> {
        let mut record = self.to_record();
        record.size = data.len() as u64;
        record.updated = self.next_updated();

        store
            .write_fragment_data(&self.owner_id, &self.id, data)
            .await?;
        store.write_fragment(&record).await?;

        self.size = record.size;
        self.updated = record.updated;
        info!(owner = %self.owner_id, id = %self.id, size = self.size, "Stored fragment data");
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    /// The declared content type, parameters included
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Content type without parameters, e.g. `text/plain`
    pub fn mime_type(&self) -> Result<String, FragmentError> {
        Ok(parse_media_type(&self.content_type)?
            .essence_str()
            .to_ascii_lowercase())
    }

    pub fn is_text(&self) -> bool {
        matches!(self.mime_type().as_deref(), Ok(convert::TEXT_PLAIN))
    }

    /// Mime types this fragment can be rendered as
    pub fn formats(&self) -> Vec<&'static str> {
        match self.mime_type() {
            Ok(mime_type) => convert::formats_for(&mime_type),
            Err(_) => Vec::new(),
        }
    }

    /// Whether clients may create fragments of this content type
    pub fn is_supported_type(value: &str) -> bool {
        let Ok(parsed) = value.parse::<mime::Mime>() else {
            return false;
        };

        let mut normalized = parsed.essence_str().to_ascii_lowercase();
        for (name, param) in parsed.params() {
            normalized.push_str("; ");
            normalized.push_str(&name.as_str().to_ascii_lowercase());
            normalized.push('=');
            normalized.push_str(&param.as_str().to_ascii_lowercase());
        }

        CREATION_TYPES.contains(&normalized.as_str())
    }
}
