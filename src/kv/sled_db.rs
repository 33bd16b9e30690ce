//! Durable key-value backend on sled
//!
//! Keys are `u32 BE len(primary) ++ primary ++ secondary`, so all entries of
//! one primary key share a prefix and no key content can collide with
//! another address. Values carry an 8-byte sequence number in front of the
//! payload; `query` orders by it to return entries in insertion order.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use tracing::{debug, info};

use super::{missing_entry, validate_keys, KeyValueStore};
use crate::error::FragmentError;

const SEQ_LEN: usize = 8;

/// A single sled tree used as a two-level store
pub struct SledDb {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledDb {
    /// Open a named tree in an already opened database
    pub fn open_tree(db: &sled::Db, name: &str) -> Result<Self, FragmentError> {
        let tree = db.open_tree(name)?;
        debug!(tree = %name, "Opened sled tree");
        Ok(Self {
            db: db.clone(),
            tree,
        })
    }

    /// Open (or create) a database at `path` and use its default tree
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FragmentError> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened sled database");
        let tree = (*db).clone();
        Ok(Self { db, tree })
    }

    fn prefix(primary: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(4 + primary.len());
        key.extend_from_slice(&(primary.len() as u32).to_be_bytes());
        key.extend_from_slice(primary.as_bytes());
        key
    }

    fn composite_key(primary: &str, secondary: &str) -> Vec<u8> {
        let mut key = Self::prefix(primary);
        key.extend_from_slice(secondary.as_bytes());
        key
    }

    fn split_value(raw: &[u8]) -> Result<(u64, Bytes), FragmentError> {
        if raw.len() < SEQ_LEN {
            return Err(FragmentError::Serialization(format!(
                "stored value too short: {} bytes",
                raw.len()
            )));
        }
        let mut seq = [0u8; SEQ_LEN];
        seq.copy_from_slice(&raw[..SEQ_LEN]);
        Ok((u64::from_be_bytes(seq), Bytes::copy_from_slice(&raw[SEQ_LEN..])))
    }
}

#[async_trait]
impl KeyValueStore for SledDb {
    async fn put(&self, primary: &str, secondary: &str, value: Bytes) -> Result<(), FragmentError> {
        validate_keys(primary, secondary)?;

        let key = Self::composite_key(primary, secondary);
        let fresh_seq = self.db.generate_id()?;

        // Overwrites keep the sequence number of the first insert.
        self.tree.fetch_and_update(&key, |existing| {
            let seq = match existing {
                Some(raw) if raw.len() >= SEQ_LEN => {
                    let mut seq = [0u8; SEQ_LEN];
                    seq.copy_from_slice(&raw[..SEQ_LEN]);
                    u64::from_be_bytes(seq)
                }
                _ => fresh_seq,
            };
            let mut stored = Vec::with_capacity(SEQ_LEN + value.len());
            stored.extend_from_slice(&seq.to_be_bytes());
            stored.extend_from_slice(&value);
            Some(stored)
        })?;

        debug!(primary = %primary, secondary = %secondary, size = value.len(), "sled put");
        Ok(())
    }

    async fn get(&self, primary: &str, secondary: &str) -> Result<Option<Bytes>, FragmentError> {
        let key = Self::composite_key(primary, secondary);
        match self.tree.get(key)? {
            Some(raw) => Ok(Some(Self::split_value(&raw)?.1)),
            None => Ok(None),
        }
    }

    async fn query(&self, primary: &str) -> Result<Vec<Bytes>, FragmentError> {
        let mut entries = Vec::new();
        for item in self.tree.scan_prefix(Self::prefix(primary)) {
            let (_, raw) = item?;
            entries.push(Self::split_value(&raw)?);
        }
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, value)| value).collect())
    }

    async fn del(&self, primary: &str, secondary: &str) -> Result<(), FragmentError> {
        let key = Self::composite_key(primary, secondary);
        match self.tree.remove(key)? {
            Some(_) => {
                debug!(primary = %primary, secondary = %secondary, "sled del");
                Ok(())
            }
            None => Err(missing_entry(primary, secondary)),
        }
    }

    async fn flush(&self) -> Result<(), FragmentError> {
        self.tree.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (SledDb, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = SledDb::open(temp_dir.path().join("kv.sled")).unwrap();
        (db, temp_dir)
    }

    #[tokio::test]
    async fn test_put_get_del() {
        let (db, _temp) = open_temp();
        db.put("owner", "id", Bytes::from_static(b"payload")).await.unwrap();
        assert_eq!(
            db.get("owner", "id").await.unwrap(),
            Some(Bytes::from_static(b"payload"))
        );

        db.del("owner", "id").await.unwrap();
        assert!(db.get("owner", "id").await.unwrap().is_none());
        assert!(db.del("owner", "id").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_query_keeps_insertion_order_across_overwrite() {
        let (db, _temp) = open_temp();
        db.put("o", "zeta", Bytes::from_static(b"1")).await.unwrap();
        db.put("o", "alpha", Bytes::from_static(b"2")).await.unwrap();
        db.put("o", "zeta", Bytes::from_static(b"3")).await.unwrap();

        let values = db.query("o").await.unwrap();
        assert_eq!(values, vec![Bytes::from_static(b"3"), Bytes::from_static(b"2")]);
    }

    #[tokio::test]
    async fn test_prefixes_do_not_bleed() {
        let (db, _temp) = open_temp();
        db.put("ab", "c", Bytes::from_static(b"1")).await.unwrap();
        db.put("a", "bc", Bytes::from_static(b"2")).await.unwrap();

        assert_eq!(db.query("a").await.unwrap(), vec![Bytes::from_static(b"2")]);
        assert_eq!(db.query("ab").await.unwrap(), vec![Bytes::from_static(b"1")]);
    }

    #[tokio::test]
    async fn test_empty_value_round_trips() {
        let (db, _temp) = open_temp();
        db.put("o", "empty", Bytes::new()).await.unwrap();
        assert_eq!(db.get("o", "empty").await.unwrap(), Some(Bytes::new()));
    }
}
