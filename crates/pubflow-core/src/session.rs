//! Per-run session store.
//!
//! A session is a durable `run -> (key -> value)` map used to pass typed
//! values between activities of one workflow execution. Each key is written
//! by exactly one activity by convention; writes are last-write-wins. A
//! value stored before an activity reports success is visible to every
//! activity scheduled after that completion.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

/// Error from session store operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session io error for run {run}: {source}")]
    Io {
        run: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session serialization error for run {run}: {source}")]
    Serialization {
        run: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable key/value store scoped by run.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn store(&self, run: &str, key: &str, value: Value) -> Result<(), SessionError>;

    async fn load(&self, run: &str, key: &str) -> Result<Option<Value>, SessionError>;
}

/// In-memory session store for tests and local runs.
#[derive(Default)]
pub struct InMemorySessionStore {
    runs: DashMap<String, HashMap<String, Value>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn store(&self, run: &str, key: &str, value: Value) -> Result<(), SessionError> {
        self.runs
            .entry(run.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn load(&self, run: &str, key: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.runs.get(run).and_then(|map| map.get(key).cloned()))
    }
}

/// File-backed session store, one JSON document per run.
///
/// Values survive process restarts; retention is handled out of band by
/// cleaning the directory, not by the workflow.
pub struct FsSessionStore {
    root: PathBuf,
}

impl FsSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn run_path(&self, run: &str) -> PathBuf {
        // Runs are UUIDs; replace path separators defensively anyway.
        let safe: String = run
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.root.join(format!("{safe}.json"))
    }

    fn read_run(&self, run: &str) -> Result<HashMap<String, Value>, SessionError> {
        let path = self.run_path(run);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| {
                SessionError::Serialization {
                    run: run.to_string(),
                    source,
                }
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(source) => Err(SessionError::Io {
                run: run.to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl SessionStore for FsSessionStore {
    async fn store(&self, run: &str, key: &str, value: Value) -> Result<(), SessionError> {
        let mut map = self.read_run(run)?;
        map.insert(key.to_string(), value);
        let bytes = serde_json::to_vec_pretty(&map).map_err(|source| {
            SessionError::Serialization {
                run: run.to_string(),
                source,
            }
        })?;
        std::fs::create_dir_all(&self.root).map_err(|source| SessionError::Io {
            run: run.to_string(),
            source,
        })?;
        std::fs::write(self.run_path(run), bytes).map_err(|source| SessionError::Io {
            run: run.to_string(),
            source,
        })
    }

    async fn load(&self, run: &str, key: &str) -> Result<Option<Value>, SessionError> {
        Ok(self.read_run(run)?.remove(key))
    }
}

/// Handle bound to one run of a workflow execution.
#[derive(Clone)]
pub struct Session {
    run: String,
    store: Arc<dyn SessionStore>,
}

impl Session {
    pub fn new(store: Arc<dyn SessionStore>, run: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            store,
        }
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub async fn store_value(&self, key: &str, value: Value) -> Result<(), SessionError> {
        self.store.store(&self.run, key, value).await
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<Value>, SessionError> {
        self.store.load(&self.run, key).await
    }

    /// Load a value expected to be a JSON string.
    pub async fn get_string(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(self
            .get_value(key)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }
}
