//! Integration tests for the fragment lifecycle
//!
//! Every scenario runs against both storage backends; the sled ones use a
//! temporary directory.

use async_trait::async_trait;
use bytes::Bytes;
use fragments::{
    open_stores, Backend, Config, Fragment, FragmentError, FragmentList, FragmentStore,
    KeyValueStore, MemoryDb, NewFragment,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Helper to open a store on the given backend
fn create_store(backend: Backend) -> (FragmentStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        storage_dir: temp_dir.path().to_path_buf(),
        backend,
        ..Config::default()
    };
    let store = FragmentStore::from_pair(open_stores(&config).unwrap());
    (store, temp_dir)
}

async fn create_text_fragment(store: &FragmentStore, owner: &str, text: &'static str) -> Fragment {
    let mut fragment = Fragment::new(NewFragment::new(owner, "text/plain")).unwrap();
    fragment.save(store).await.unwrap();
    fragment
        .set_data(store, Bytes::from_static(text.as_bytes()))
        .await
        .unwrap();
    fragment
}

async fn lifecycle(backend: Backend) {
    let (store, _temp) = create_store(backend);

    let fragment = create_text_fragment(&store, "owner-a", "hello fragments").await;
    assert_eq!(fragment.size(), 15);

    let loaded = Fragment::by_id(&store, "owner-a", fragment.id()).await.unwrap();
    assert_eq!(loaded, fragment);
    assert_eq!(
        loaded.get_data(&store).await.unwrap(),
        Some(Bytes::from_static(b"hello fragments"))
    );

    // another owner cannot see it
    assert!(Fragment::by_id(&store, "owner-b", fragment.id())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(Fragment::by_user(&store, "owner-b", false).await.unwrap().is_empty());

    Fragment::delete(&store, "owner-a", fragment.id()).await.unwrap();
    assert!(Fragment::by_id(&store, "owner-a", fragment.id())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(store
        .read_fragment_data("owner-a", fragment.id())
        .await
        .unwrap()
        .is_none());
}

async fn listing_order(backend: Backend) {
    let (store, _temp) = create_store(backend);

    let first = create_text_fragment(&store, "owner", "one").await;
    let second = create_text_fragment(&store, "owner", "two").await;
    let third = create_text_fragment(&store, "owner", "three").await;

    // rewriting data must not move a fragment in the listing
    let mut first_again = Fragment::by_id(&store, "owner", first.id()).await.unwrap();
    first_again
        .set_data(&store, Bytes::from_static(b"one, edited"))
        .await
        .unwrap();

    let ids = Fragment::by_user(&store, "owner", false).await.unwrap();
    assert_eq!(ids.ids(), vec![first.id(), second.id(), third.id()]);

    match Fragment::by_user(&store, "owner", true).await.unwrap() {
        FragmentList::Expanded(records) => {
            assert_eq!(records.len(), 3);
            assert_eq!(records[0].size, 11);
            assert_eq!(records[2].content_type, "text/plain");
        }
        other => panic!("expected expanded list, got {:?}", other),
    }
}

#[tokio::test]
async fn test_lifecycle_memory() {
    lifecycle(Backend::Memory).await;
}

#[tokio::test]
async fn test_lifecycle_sled() {
    lifecycle(Backend::Sled).await;
}

#[tokio::test]
async fn test_listing_order_memory() {
    listing_order(Backend::Memory).await;
}

#[tokio::test]
async fn test_listing_order_sled() {
    listing_order(Backend::Sled).await;
}

#[tokio::test]
async fn test_sled_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config {
        storage_dir: temp_dir.path().to_path_buf(),
        backend: Backend::Sled,
        ..Config::default()
    };

    let id = {
        let store = FragmentStore::from_pair(open_stores(&config).unwrap());
        let fragment = create_text_fragment(&store, "owner", "durable").await;
        store.flush().await.unwrap();
        fragment.id().to_string()
    };

    let store = FragmentStore::from_pair(open_stores(&config).unwrap());
    let fragment = Fragment::by_id(&store, "owner", &id).await.unwrap();
    assert_eq!(
        fragment.get_data(&store).await.unwrap(),
        Some(Bytes::from_static(b"durable"))
    );
}

/// Memory store whose deletes can be made to fail
#[derive(Default)]
struct FlakyDb {
    inner: MemoryDb,
    fail_deletes: AtomicBool,
}

#[async_trait]
impl KeyValueStore for FlakyDb {
    async fn put(&self, primary: &str, secondary: &str, value: Bytes) -> Result<(), FragmentError> {
        self.inner.put(primary, secondary, value).await
    }

    async fn get(&self, primary: &str, secondary: &str) -> Result<Option<Bytes>, FragmentError> {
        self.inner.get(primary, secondary).await
    }

    async fn query(&self, primary: &str) -> Result<Vec<Bytes>, FragmentError> {
        self.inner.query(primary).await
    }

    async fn del(&self, primary: &str, secondary: &str) -> Result<(), FragmentError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(FragmentError::Internal("disk on fire".to_string()));
        }
        self.inner.del(primary, secondary).await
    }
}

#[tokio::test]
async fn test_failed_data_delete_restores_metadata() {
    let data = Arc::new(FlakyDb::default());
    let store = FragmentStore::new(Arc::new(MemoryDb::new()), data.clone());
    let fragment = create_text_fragment(&store, "owner", "keep me").await;

    data.fail_deletes.store(true, Ordering::SeqCst);
    let err = Fragment::delete(&store, "owner", fragment.id()).await.unwrap_err();
    assert!(matches!(err, FragmentError::Internal(_)));

    let loaded = Fragment::by_id(&store, "owner", fragment.id()).await.unwrap();
    assert_eq!(loaded, fragment);
    assert_eq!(
        loaded.get_data(&store).await.unwrap(),
        Some(Bytes::from_static(b"keep me"))
    );
}

#[tokio::test]
async fn test_failed_metadata_delete_restores_data() {
    let metadata = Arc::new(FlakyDb::default());
    let store = FragmentStore::new(metadata.clone(), Arc::new(MemoryDb::new()));
    let fragment = create_text_fragment(&store, "owner", "keep me too").await;

    metadata.fail_deletes.store(true, Ordering::SeqCst);
    assert!(Fragment::delete(&store, "owner", fragment.id()).await.is_err());

    assert!(Fragment::by_id(&store, "owner", fragment.id()).await.is_ok());
    assert_eq!(
        store.read_fragment_data("owner", fragment.id()).await.unwrap(),
        Some(Bytes::from_static(b"keep me too"))
    );

    // once the store recovers the delete goes through
    metadata.fail_deletes.store(false, Ordering::SeqCst);
    Fragment::delete(&store, "owner", fragment.id()).await.unwrap();
    assert!(Fragment::by_user(&store, "owner", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_corrupt_metadata_is_a_serialization_error() {
    let metadata = Arc::new(MemoryDb::new());
    let store = FragmentStore::new(metadata.clone(), Arc::new(MemoryDb::new()));
    metadata
        .put("owner", "broken", Bytes::from_static(b"not json"))
        .await
        .unwrap();

    let err = Fragment::by_id(&store, "owner", "broken").await.unwrap_err();
    assert!(matches!(err, FragmentError::Serialization(_)));
}
