//! Monitor event sink.
//!
//! Activities emit structured lifecycle events (start/end/error) and article
//! property updates keyed by `(article_id, version, run)`. Delivery is
//! best-effort: a failure to emit is logged and swallowed, never failing the
//! activity that produced it. Consumers must tolerate out-of-order arrival.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::queue::MessageQueue;

/// Lifecycle phase of a monitored component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    End,
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A single lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub article_id: String,
    pub version: Option<String>,
    pub run: String,
    /// Pretty name of the emitting component.
    pub component: String,
    pub phase: Phase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A named article property update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyUpdate {
    pub article_id: String,
    pub key: String,
    pub value: serde_json::Value,
    /// Property value type hint, e.g. `text` or `number`.
    pub kind: String,
    pub version: Option<String>,
}

/// Error from a sink implementation.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("monitor transport error: {0}")]
    Transport(String),
}

/// Destination for monitor events.
#[async_trait]
pub trait MonitorSink: Send + Sync + 'static {
    async fn emit(&self, event: MonitorEvent) -> Result<(), MonitorError>;

    async fn set_property(&self, update: PropertyUpdate) -> Result<(), MonitorError>;
}

/// Sink that discards everything.
pub struct NullSink;

#[async_trait]
impl MonitorSink for NullSink {
    async fn emit(&self, _event: MonitorEvent) -> Result<(), MonitorError> {
        Ok(())
    }

    async fn set_property(&self, _update: PropertyUpdate) -> Result<(), MonitorError> {
        Ok(())
    }
}

/// Recording sink for tests.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<MonitorEvent>>,
    properties: Mutex<Vec<PropertyUpdate>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().clone()
    }

    pub fn properties(&self) -> Vec<PropertyUpdate> {
        self.properties.lock().clone()
    }
}

#[async_trait]
impl MonitorSink for MemorySink {
    async fn emit(&self, event: MonitorEvent) -> Result<(), MonitorError> {
        self.events.lock().push(event);
        Ok(())
    }

    async fn set_property(&self, update: PropertyUpdate) -> Result<(), MonitorError> {
        self.properties.lock().push(update);
        Ok(())
    }
}

/// Envelope written to the monitor queue.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
enum QueueEnvelope {
    Event(MonitorEvent),
    Property(PropertyUpdate),
}

/// Sink that serializes events onto a message queue.
pub struct QueueSink {
    queue: Arc<dyn MessageQueue>,
}

impl QueueSink {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl MonitorSink for QueueSink {
    async fn emit(&self, event: MonitorEvent) -> Result<(), MonitorError> {
        let body = serde_json::to_string(&QueueEnvelope::Event(event))
            .map_err(|e| MonitorError::Transport(e.to_string()))?;
        self.queue
            .send(body)
            .await
            .map_err(|e| MonitorError::Transport(e.to_string()))
    }

    async fn set_property(&self, update: PropertyUpdate) -> Result<(), MonitorError> {
        let body = serde_json::to_string(&QueueEnvelope::Property(update))
            .map_err(|e| MonitorError::Transport(e.to_string()))?;
        self.queue
            .send(body)
            .await
            .map_err(|e| MonitorError::Transport(e.to_string()))
    }
}

/// Swallowing front-end shared by every activity.
///
/// All emission goes through here so a broken sink can never stall a
/// pipeline: failures are logged at `warn` and dropped.
#[derive(Clone)]
pub struct Monitor {
    sink: Arc<dyn MonitorSink>,
}

impl Monitor {
    pub fn new(sink: Arc<dyn MonitorSink>) -> Self {
        Self { sink }
    }

    pub fn null() -> Self {
        Self::new(Arc::new(NullSink))
    }

    pub async fn event(
        &self,
        article_id: &str,
        version: Option<&str>,
        run: &str,
        component: &str,
        phase: Phase,
        message: impl Into<String>,
    ) {
        let event = MonitorEvent {
            article_id: article_id.to_string(),
            version: version.map(str::to_string),
            run: run.to_string(),
            component: component.to_string(),
            phase,
            message: message.into(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self.sink.emit(event).await {
            tracing::warn!(%article_id, %run, component, "monitor emit failed: {err}");
        }
    }

    pub async fn set_property(
        &self,
        article_id: &str,
        key: &str,
        value: serde_json::Value,
        kind: &str,
        version: Option<&str>,
    ) {
        let update = PropertyUpdate {
            article_id: article_id.to_string(),
            key: key.to_string(),
            value,
            kind: kind.to_string(),
            version: version.map(str::to_string),
        };
        if let Err(err) = self.sink.set_property(update).await {
            tracing::warn!(%article_id, key, "monitor property update failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_records_events() {
        let sink = Arc::new(MemorySink::new());
        let monitor = Monitor::new(sink.clone());

        monitor
            .event("353", Some("1"), "run-1", "Deposit", Phase::Start, "starting")
            .await;
        monitor
            .event("353", Some("1"), "run-1", "Deposit", Phase::End, "finished")
            .await;

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].phase, Phase::Start);
        assert_eq!(events[1].phase, Phase::End);
        assert_eq!(events[1].component, "Deposit");
    }

    #[tokio::test]
    async fn queue_sink_serializes_to_queue() {
        let queue = Arc::new(crate::queue::InMemoryQueue::new());
        let monitor = Monitor::new(Arc::new(QueueSink::new(queue.clone())));

        monitor
            .event("353", None, "run-1", "Ingest", Phase::Error, "boom")
            .await;

        let message = queue
            .receive(std::time::Duration::from_millis(10))
            .await
            .unwrap()
            .expect("event enqueued");
        assert!(message.body.contains("\"phase\":\"error\""));
        assert!(message.body.contains("Ingest"));
    }

    #[tokio::test]
    async fn failing_sink_is_swallowed() {
        struct FailingSink;

        #[async_trait]
        impl MonitorSink for FailingSink {
            async fn emit(&self, _event: MonitorEvent) -> Result<(), MonitorError> {
                Err(MonitorError::Transport("unreachable".into()))
            }

            async fn set_property(&self, _update: PropertyUpdate) -> Result<(), MonitorError> {
                Err(MonitorError::Transport("unreachable".into()))
            }
        }

        let monitor = Monitor::new(Arc::new(FailingSink));
        // Must not panic or propagate.
        monitor
            .event("353", None, "run-1", "Deposit", Phase::Start, "starting")
            .await;
        monitor
            .set_property("353", "publication-status", serde_json::json!("published"), "text", None)
            .await;
    }
}
