//! Digest endpoint client.
//!
//! `GET digest/{id}` returns the current record or nothing; `PUT
//! digest/{id}` upserts. The endpoint is the source of truth: when the
//! existing record is already `published`, its `stage` and `published`
//! timestamp are preserved through the upsert; otherwise the stage is
//! `preview`.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

/// Error from the digest endpoint.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("digest transport error: {0}")]
    Transport(String),

    #[error("digest endpoint rejected {digest_id} with status {status}")]
    Rejected { digest_id: String, status: u16 },
}

/// Seam the ingest pipeline upserts through.
#[async_trait]
pub trait DigestEndpoint: Send + Sync + 'static {
    /// Current record, or `None` when the digest does not exist yet.
    async fn get(&self, digest_id: &str) -> Result<Option<Value>, DigestError>;

    /// Idempotent upsert.
    async fn put(&self, digest_id: &str, digest: Value) -> Result<(), DigestError>;
}

/// Apply the stage/published preservation rule to a digest about to be put.
pub fn preserve_published_fields(digest: &mut Value, existing: Option<&Value>) {
    let published_record = existing
        .filter(|record| record.get("stage").and_then(Value::as_str) == Some("published"));

    match published_record {
        Some(record) => {
            digest["stage"] = Value::String("published".into());
            if let Some(published) = record.get("published") {
                digest["published"] = published.clone();
            }
        }
        None => {
            digest["stage"] = Value::String("preview".into());
        }
    }
}

/// HTTP implementation.
pub struct HttpDigestEndpoint {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDigestEndpoint {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, digest_id: &str) -> String {
        format!("{}/{digest_id}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl DigestEndpoint for HttpDigestEndpoint {
    async fn get(&self, digest_id: &str) -> Result<Option<Value>, DigestError> {
        let response = self
            .client
            .get(self.url(digest_id))
            .send()
            .await
            .map_err(|err| DigestError::Transport(err.to_string()))?;

        match response.status().as_u16() {
            200 => response
                .json::<Value>()
                .await
                .map(Some)
                .map_err(|err| DigestError::Transport(err.to_string())),
            404 => Ok(None),
            status => Err(DigestError::Rejected {
                digest_id: digest_id.to_string(),
                status,
            }),
        }
    }

    async fn put(&self, digest_id: &str, digest: Value) -> Result<(), DigestError> {
        let response = self
            .client
            .put(self.url(digest_id))
            .json(&digest)
            .send()
            .await
            .map_err(|err| DigestError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DigestError::Rejected {
                digest_id: digest_id.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// In-memory endpoint for tests.
#[derive(Default)]
pub struct MemoryDigestEndpoint {
    records: Mutex<HashMap<String, Value>>,
}

impl MemoryDigestEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, digest_id: &str, record: Value) -> Self {
        self.records.lock().insert(digest_id.to_string(), record);
        self
    }

    pub fn record(&self, digest_id: &str) -> Option<Value> {
        self.records.lock().get(digest_id).cloned()
    }

    pub fn put_count(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl DigestEndpoint for MemoryDigestEndpoint {
    async fn get(&self, digest_id: &str) -> Result<Option<Value>, DigestError> {
        Ok(self.records.lock().get(digest_id).cloned())
    }

    async fn put(&self, digest_id: &str, digest: Value) -> Result<(), DigestError> {
        self.records.lock().insert(digest_id.to_string(), digest);
        Ok(())
    }
}
