//! In-memory object store for tests and local runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::address::StorageAddress;
use crate::store::{ObjectStore, StorageError};

/// In-memory implementation of [`ObjectStore`].
///
/// Objects are keyed `(bucket, key)` in a sorted map so `list` is
/// lexicographic for free, matching the provider contract.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), Bytes>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Seed an object directly, bypassing the trait (test setup).
    pub fn seed(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    /// All keys currently stored for a bucket (test assertions).
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .read()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list(&self, prefix: &StorageAddress) -> Result<Vec<String>, StorageError> {
        let objects = self.objects.read();
        Ok(objects
            .keys()
            .filter(|(bucket, key)| bucket == &prefix.bucket && key.starts_with(&prefix.key))
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn get(&self, address: &StorageAddress) -> Result<Bytes, StorageError> {
        self.objects
            .read()
            .get(&(address.bucket.clone(), address.key.clone()))
            .cloned()
            .ok_or_else(|| StorageError::not_found(address))
    }

    async fn put(&self, address: &StorageAddress, body: Bytes) -> Result<(), StorageError> {
        self.objects
            .write()
            .insert((address.bucket.clone(), address.key.clone()), body);
        Ok(())
    }

    async fn copy(
        &self,
        source: &StorageAddress,
        destination: &StorageAddress,
    ) -> Result<(), StorageError> {
        let body = self.get(source).await?;
        self.put(destination, body).await
    }

    async fn delete(&self, address: &StorageAddress) -> Result<(), StorageError> {
        self.objects
            .write()
            .remove(&(address.bucket.clone(), address.key.clone()))
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(address))
    }

    async fn exists(&self, address: &StorageAddress) -> Result<bool, StorageError> {
        Ok(self
            .objects
            .read()
            .contains_key(&(address.bucket.clone(), address.key.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(key: &str) -> StorageAddress {
        StorageAddress::new("s3", "bucket", key)
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryObjectStore::new();
        let address = addr("outbox/elife-29353-v1.xml");

        store.put(&address, Bytes::from_static(b"<xml/>")).await.unwrap();
        assert!(store.exists(&address).await.unwrap());
        assert_eq!(store.get(&address).await.unwrap(), Bytes::from_static(b"<xml/>"));

        store.delete(&address).await.unwrap();
        assert!(!store.exists(&address).await.unwrap());
        assert!(matches!(
            store.get(&address).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_is_lexicographic_and_prefix_scoped() {
        let store = InMemoryObjectStore::new();
        store.seed("bucket", "outbox/b.xml", "b");
        store.seed("bucket", "outbox/a.xml", "a");
        store.seed("bucket", "published/c.xml", "c");
        store.seed("other", "outbox/d.xml", "d");

        let keys = store.list(&addr("outbox/")).await.unwrap();
        assert_eq!(keys, vec!["outbox/a.xml", "outbox/b.xml"]);
    }

    #[tokio::test]
    async fn copy_then_delete_moves_object() {
        let store = InMemoryObjectStore::new();
        let source = addr("outbox/file.xml");
        let destination = addr("published/20170101000000/file.xml");

        store.put(&source, Bytes::from_static(b"x")).await.unwrap();
        store.copy(&source, &destination).await.unwrap();
        assert!(store.exists(&source).await.unwrap());
        assert!(store.exists(&destination).await.unwrap());

        store.delete(&source).await.unwrap();
        assert!(!store.exists(&source).await.unwrap());
        assert!(store.exists(&destination).await.unwrap());
    }

    #[tokio::test]
    async fn copy_missing_source_reports_address() {
        let store = InMemoryObjectStore::new();
        let result = store.copy(&addr("missing.xml"), &addr("dest.xml")).await;
        match result {
            Err(StorageError::NotFound { address }) => {
                assert!(address.contains("missing.xml"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
