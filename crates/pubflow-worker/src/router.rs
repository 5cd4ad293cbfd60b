//! S3 event router (queue worker).
//!
//! Consumes S3 object-creation notifications, matches them against ordered
//! pattern rules, and enqueues a workflow-start message for the first rule
//! that matches. The source notification is deleted only after the start
//! message is accepted by the outgoing queue; unmatched and non-S3
//! messages are logged and acknowledged.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use pubflow_core::queue::{MessageQueue, QueueMessage};
use pubflow_durable::flag::RunFlag;
use pubflow_durable::starter::StartMessage;

/// Error loading routing rules.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("routing rules did not parse: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("routing pattern did not compile: {0}")]
    Pattern(#[from] regex::Error),
}

/// One routing rule as written in the rules resource.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingRule {
    pub bucket_pattern: String,
    pub key_pattern: String,
    pub starter: String,
}

struct CompiledRule {
    bucket: Regex,
    key: Regex,
    starter: String,
}

/// Ordered routing rules; first match wins.
pub struct RoutingRules {
    rules: Vec<CompiledRule>,
}

impl RoutingRules {
    pub fn from_yaml(source: &str) -> Result<Self, RouterError> {
        let rules: Vec<RoutingRule> = serde_yaml::from_str(source)?;
        Self::from_rules(rules)
    }

    pub fn from_rules(rules: Vec<RoutingRule>) -> Result<Self, RouterError> {
        let compiled = rules
            .into_iter()
            .map(|rule| {
                Ok(CompiledRule {
                    bucket: Regex::new(&rule.bucket_pattern)?,
                    key: Regex::new(&rule.key_pattern)?,
                    starter: rule.starter,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules: compiled })
    }

    /// The starter for the first rule matching this event, if any.
    pub fn route(&self, bucket: &str, key: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.bucket.is_match(bucket) && rule.key.is_match(key))
            .map(|rule| rule.starter.as_str())
    }
}

/// An S3 object-creation notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Notification {
    pub bucket: String,
    pub key: String,
    pub event_time: Option<String>,
}

impl S3Notification {
    /// Parse a notification body; `None` means the message is not an S3
    /// event and should be dropped.
    pub fn parse(body: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        let record = value.get("Records")?.as_array()?.first()?;
        let s3 = record.get("s3")?;
        Some(Self {
            bucket: s3.get("bucket")?.get("name")?.as_str()?.to_string(),
            key: s3.get("object")?.get("key")?.as_str()?.to_string(),
            event_time: record
                .get("eventTime")
                .and_then(|t| t.as_str())
                .map(str::to_string),
        })
    }
}

/// The queue worker process.
pub struct QueueWorker {
    incoming: Arc<dyn MessageQueue>,
    outgoing: Arc<dyn MessageQueue>,
    rules: RoutingRules,
    poll_wait: Duration,
}

impl QueueWorker {
    pub fn new(
        incoming: Arc<dyn MessageQueue>,
        outgoing: Arc<dyn MessageQueue>,
        rules: RoutingRules,
    ) -> Self {
        Self {
            incoming,
            outgoing,
            rules,
            poll_wait: Duration::from_secs(20),
        }
    }

    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    pub async fn run(&self, flag: RunFlag) {
        info!("queue worker polling");
        while flag.green() {
            match self.incoming.receive(self.poll_wait).await {
                Ok(Some(message)) => self.process(message).await,
                Ok(None) => {}
                Err(err) => {
                    error!("notification queue receive failed: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!("graceful shutdown");
    }

    /// Handle one notification message.
    pub async fn process(&self, message: QueueMessage) {
        let Some(notification) = S3Notification::parse(&message.body) else {
            info!("dropping message of unknown kind");
            self.acknowledge(&message).await;
            return;
        };

        let Some(starter) = self
            .rules
            .route(&notification.bucket, &notification.key)
        else {
            info!(
                "could not handle file {} in bucket {}",
                notification.key, notification.bucket
            );
            self.acknowledge(&message).await;
            return;
        };

        let start = StartMessage {
            starter: starter.to_string(),
            data: json!({
                "bucket": notification.bucket,
                "key": notification.key,
                "event_time": notification.event_time,
                "run": Uuid::now_v7().to_string(),
            }),
        };
        let body = match serde_json::to_string(&start) {
            Ok(body) => body,
            Err(err) => {
                error!("could not serialize start message: {err}");
                return;
            }
        };

        // Delete the notification only once the start message is accepted;
        // a failed send leaves it for redelivery.
        match self.outgoing.send(body).await {
            Ok(()) => {
                info!(starter, key = %notification.key, "workflow start enqueued");
                self.acknowledge(&message).await;
            }
            Err(err) => {
                error!("could not enqueue workflow start: {err}");
            }
        }
    }

    async fn acknowledge(&self, message: &QueueMessage) {
        if let Err(err) = self.incoming.delete(message).await {
            error!("could not delete notification: {err}");
        }
    }
}
