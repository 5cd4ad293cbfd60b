//! S3-backed object store provider.
//!
//! Built on the `object_store` crate. Clients are created lazily per bucket
//! and cached; credentials come from the standard AWS environment.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::ObjectStore as ProviderStore;
use parking_lot::RwLock;

use crate::address::StorageAddress;
use crate::store::{ObjectStore, StorageError};

/// S3 implementation of [`ObjectStore`].
pub struct S3ObjectStore {
    region: String,
    clients: RwLock<HashMap<String, Arc<dyn ProviderStore>>>,
}

impl S3ObjectStore {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            clients: RwLock::new(HashMap::new()),
        }
    }

    fn client(
        &self,
        address: &StorageAddress,
    ) -> Result<Arc<dyn ProviderStore>, StorageError> {
        if let Some(client) = self.clients.read().get(&address.bucket) {
            return Ok(client.clone());
        }

        let client: Arc<dyn ProviderStore> = Arc::new(
            AmazonS3Builder::from_env()
                .with_bucket_name(address.bucket.clone())
                .with_region(self.region.clone())
                .build()
                .map_err(|err| StorageError::io(address, err))?,
        );
        self.clients
            .write()
            .insert(address.bucket.clone(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, prefix: &StorageAddress) -> Result<Vec<String>, StorageError> {
        let client = self.client(prefix)?;
        let path = Path::from(prefix.key.as_str());
        let mut stream = client.list(Some(&path));

        let mut keys = Vec::new();
        while let Some(entry) = stream.next().await {
            let meta = entry.map_err(|err| StorageError::io(prefix, err))?;
            keys.push(meta.location.to_string());
        }
        // Providers stream pages; the facade promises lexicographic order.
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, address: &StorageAddress) -> Result<Bytes, StorageError> {
        let client = self.client(address)?;
        let path = Path::from(address.key.as_str());
        let result = client.get(&path).await.map_err(|err| match err {
            object_store::Error::NotFound { .. } => StorageError::not_found(address),
            other => StorageError::io(address, other),
        })?;
        result
            .bytes()
            .await
            .map_err(|err| StorageError::io(address, err))
    }

    async fn put(&self, address: &StorageAddress, body: Bytes) -> Result<(), StorageError> {
        let client = self.client(address)?;
        let path = Path::from(address.key.as_str());
        client
            .put(&path, body.into())
            .await
            .map(|_| ())
            .map_err(|err| StorageError::io(address, err))
    }

    async fn copy(
        &self,
        source: &StorageAddress,
        destination: &StorageAddress,
    ) -> Result<(), StorageError> {
        if source.bucket == destination.bucket {
            let client = self.client(source)?;
            let from = Path::from(source.key.as_str());
            let to = Path::from(destination.key.as_str());
            return client.copy(&from, &to).await.map_err(|err| match err {
                object_store::Error::NotFound { .. } => StorageError::not_found(source),
                other => StorageError::io(source, other),
            });
        }

        // Cross-bucket copies stream through this process.
        let body = self.get(source).await?;
        self.put(destination, body).await
    }

    async fn delete(&self, address: &StorageAddress) -> Result<(), StorageError> {
        let client = self.client(address)?;
        let path = Path::from(address.key.as_str());
        client.delete(&path).await.map_err(|err| match err {
            object_store::Error::NotFound { .. } => StorageError::not_found(address),
            other => StorageError::io(address, other),
        })
    }

    async fn exists(&self, address: &StorageAddress) -> Result<bool, StorageError> {
        let client = self.client(address)?;
        let path = Path::from(address.key.as_str());
        match client.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(StorageError::io(address, err)),
        }
    }
}
