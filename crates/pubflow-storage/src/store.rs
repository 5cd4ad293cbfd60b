//! Object store trait.

use async_trait::async_trait;
use bytes::Bytes;

use crate::address::StorageAddress;

/// Error from object store operations, carrying the offending address.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io failure at {address}: {detail}")]
    Io { address: String, detail: String },

    #[error("object not found at {address}")]
    NotFound { address: String },

    #[error("{0}")]
    Address(#[from] crate::address::AddressError),
}

impl StorageError {
    pub fn io(address: &StorageAddress, detail: impl std::fmt::Display) -> Self {
        Self::Io {
            address: address.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn not_found(address: &StorageAddress) -> Self {
        Self::NotFound {
            address: address.to_string(),
        }
    }
}

/// Uniform list/get/put/copy/delete/exists over a storage provider.
///
/// `list` returns full keys in lexicographic order; callers filter by
/// suffix. `copy` is atomic at the object level, and callers must only
/// `delete` a source after `copy` has returned success.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// List keys under `prefix` within one bucket, lexicographically.
    async fn list(&self, prefix: &StorageAddress) -> Result<Vec<String>, StorageError>;

    async fn get(&self, address: &StorageAddress) -> Result<Bytes, StorageError>;

    async fn put(&self, address: &StorageAddress, body: Bytes) -> Result<(), StorageError>;

    async fn copy(
        &self,
        source: &StorageAddress,
        destination: &StorageAddress,
    ) -> Result<(), StorageError>;

    async fn delete(&self, address: &StorageAddress) -> Result<(), StorageError>;

    async fn exists(&self, address: &StorageAddress) -> Result<bool, StorageError>;
}
