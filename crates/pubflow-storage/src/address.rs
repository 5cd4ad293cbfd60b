//! Storage addresses.

use serde::{Deserialize, Serialize};

/// Error parsing a storage address.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid storage address {0:?}, expected scheme://bucket/key")]
pub struct AddressError(pub String);

/// An object address of the form `scheme://bucket/key`.
///
/// Keys use `/` as the path separator; no custom metadata is carried.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageAddress {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl StorageAddress {
    pub fn new(
        scheme: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse a `scheme://bucket/key` string.
    pub fn parse(resource: &str) -> Result<Self, AddressError> {
        let (scheme, rest) = resource
            .split_once("://")
            .ok_or_else(|| AddressError(resource.to_string()))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| AddressError(resource.to_string()))?;
        if scheme.is_empty() || bucket.is_empty() || key.is_empty() {
            return Err(AddressError(resource.to_string()));
        }
        Ok(Self::new(scheme, bucket, key))
    }

    /// Address with the same scheme and bucket but a different key.
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self::new(self.scheme.clone(), self.bucket.clone(), key)
    }

    /// Last path element of the key.
    pub fn file_name(&self) -> &str {
        pubflow_core::identity::file_name_from_key(&self.key)
    }
}

impl std::fmt::Display for StorageAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let address = StorageAddress::parse("s3://bucket/prefix/file.xml").unwrap();
        assert_eq!(address.scheme, "s3");
        assert_eq!(address.bucket, "bucket");
        assert_eq!(address.key, "prefix/file.xml");
        assert_eq!(address.to_string(), "s3://bucket/prefix/file.xml");
        assert_eq!(address.file_name(), "file.xml");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(StorageAddress::parse("bucket/key").is_err());
        assert!(StorageAddress::parse("s3://bucket").is_err());
        assert!(StorageAddress::parse("s3:///key").is_err());
    }

    #[test]
    fn with_key_keeps_bucket() {
        let address = StorageAddress::new("s3", "bucket", "a/b.xml");
        let moved = address.with_key("c/d.xml");
        assert_eq!(moved.to_string(), "s3://bucket/c/d.xml");
    }
}
