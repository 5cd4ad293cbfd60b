//! Outbox/published folder contract.
//!
//! Each deposit pipeline owns two well-known prefixes in one bucket:
//! `<name>/outbox/` holds pending files and
//! `<name>/published/<YYYYMMDDHHMMSS>/` archives them after a successful
//! deposit. A file is always copied to published before the outbox key is
//! deleted, so it is never in neither place (and may briefly be in both).

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::address::StorageAddress;
use crate::store::{ObjectStore, StorageError};

/// Datestamp used in published folder names.
pub fn datestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// Handle to one pipeline's outbox.
#[derive(Clone)]
pub struct Outbox {
    store: Arc<dyn ObjectStore>,
    scheme: String,
    bucket: String,
    /// Pipeline prefix, e.g. `crossref`.
    name: String,
}

impl Outbox {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scheme: impl Into<String>,
        bucket: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            scheme: scheme.into(),
            bucket: bucket.into(),
            name: name.into(),
        }
    }

    pub fn outbox_prefix(&self) -> String {
        format!("{}/outbox/", self.name)
    }

    pub fn published_prefix(&self, date_stamp: &str) -> String {
        format!("{}/published/{}/", self.name, date_stamp)
    }

    fn address(&self, key: impl Into<String>) -> StorageAddress {
        StorageAddress::new(self.scheme.clone(), self.bucket.clone(), key)
    }

    /// Outbox keys with the given suffix, lexicographic.
    pub async fn list(&self, suffix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = self.address(self.outbox_prefix());
        let keys = self.store.list(&prefix).await?;
        Ok(keys
            .into_iter()
            .filter(|key| key.ends_with(suffix) && key != &self.outbox_prefix())
            .collect())
    }

    /// Download one outbox object.
    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.store.get(&self.address(key)).await
    }

    /// Archive outbox files into `published/<date_stamp>/`.
    ///
    /// Copy first, delete only after the copy succeeded.
    pub async fn archive(
        &self,
        file_names: &[String],
        date_stamp: &str,
    ) -> Result<(), StorageError> {
        let to_folder = self.published_prefix(date_stamp);
        for name in file_names {
            let file_name = pubflow_core::identity::file_name_from_key(name);
            let source = self.address(format!("{}{}", self.outbox_prefix(), file_name));
            let destination = self.address(format!("{to_folder}{file_name}"));

            self.store.copy(&source, &destination).await?;
            self.store.delete(&source).await?;
        }
        Ok(())
    }

    /// Upload a generated deposit document under `published/<stamp>/batch/`.
    pub async fn upload_batch_file(
        &self,
        date_stamp: &str,
        file_name: &str,
        body: Bytes,
    ) -> Result<(), StorageError> {
        let key = format!("{}batch/{}", self.published_prefix(date_stamp), file_name);
        self.store.put(&self.address(key), body).await
    }
}
