//! Starter family.
//!
//! A starter composes a `(workflow_id, workflow_type, version, input)`
//! tuple and asks the backend to start an execution. Workflow ids are
//! stable and content-derived so a duplicated trigger deduplicates at the
//! backend: the "already started" error is swallowed and logged, every
//! other error surfaces. The starter loop feeds starters from the
//! workflow-start queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::backend::{StartError, StartRequest, WorkflowBackend};
use crate::flag::RunFlag;
use pubflow_core::queue::MessageQueue;

/// Error surfaced by a starter (duplicate starts are not errors).
#[derive(Debug, thiserror::Error)]
pub enum StarterError {
    #[error("backend error starting workflow: {0}")]
    Backend(String),

    #[error("start message missing required field {0}")]
    MissingField(&'static str),
}

/// One entry of the starter family.
#[async_trait]
pub trait Starter: Send + Sync + 'static {
    /// Name the router and cron address this starter by.
    fn name(&self) -> &'static str;

    /// Compose and start the workflow execution for one trigger payload.
    async fn start(
        &self,
        backend: &Arc<dyn WorkflowBackend>,
        data: Value,
    ) -> Result<(), StarterError>;
}

/// Start an execution, swallowing the duplicate-start error.
pub async fn start_execution(
    backend: &Arc<dyn WorkflowBackend>,
    request: StartRequest,
) -> Result<(), StarterError> {
    let workflow_id = request.workflow_id.clone();
    info!(%workflow_id, "starting workflow");
    match backend.start_workflow_execution(request).await {
        Ok(run) => {
            info!(%workflow_id, %run, "workflow execution started");
            Ok(())
        }
        Err(StartError::AlreadyStarted { workflow_id }) => {
            info!(
                %workflow_id,
                "there is already a running workflow with this id, not starting another"
            );
            Ok(())
        }
        Err(StartError::Backend(message)) => {
            error!(%workflow_id, "workflow start failed: {message}");
            Err(StarterError::Backend(message))
        }
    }
}

/// Workflow id for a file-triggered workflow:
/// `<WorkflowName>_<filename-sans-extension>[.<run-suffix>]`.
pub fn file_workflow_id(workflow_name: &str, file_name: &str, run_suffix: Option<&str>) -> String {
    let stem = file_name.split('.').next().unwrap_or(file_name);
    match run_suffix {
        Some(suffix) => format!("{workflow_name}_{stem}.{suffix}"),
        None => format!("{workflow_name}_{stem}"),
    }
}

/// Registry of starters keyed by name.
#[derive(Default)]
pub struct StarterRegistry {
    starters: HashMap<String, Arc<dyn Starter>>,
}

impl StarterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, starter: impl Starter) {
        self.starters
            .insert(starter.name().to_string(), Arc::new(starter));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Starter>> {
        self.starters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.starters.contains_key(name)
    }
}

/// Message that asks for a workflow to be started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartMessage {
    pub starter: String,
    pub data: Value,
}

/// Consumes start messages and dispatches them to starters.
pub struct StarterLoop {
    queue: Arc<dyn MessageQueue>,
    registry: Arc<StarterRegistry>,
    backend: Arc<dyn WorkflowBackend>,
    poll_wait: Duration,
}

impl StarterLoop {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        registry: Arc<StarterRegistry>,
        backend: Arc<dyn WorkflowBackend>,
    ) -> Self {
        Self {
            queue,
            registry,
            backend,
            poll_wait: Duration::from_secs(20),
        }
    }

    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    pub async fn run(&self, flag: RunFlag) {
        info!("starter loop polling");
        while flag.green() {
            match self.queue.receive(self.poll_wait).await {
                Ok(Some(message)) => {
                    self.handle(&message.body).await;
                    if let Err(err) = self.queue.delete(&message).await {
                        error!("could not delete start message: {err}");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    error!("start queue receive failed: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!("graceful shutdown");
    }

    /// Process one start message body.
    pub async fn handle(&self, body: &str) {
        let message: StartMessage = match serde_json::from_str(body) {
            Ok(message) => message,
            Err(err) => {
                warn!("discarding malformed start message: {err}");
                return;
            }
        };

        let Some(starter) = self.registry.get(&message.starter) else {
            warn!("no starter registered with name {}", message.starter);
            return;
        };

        if let Err(err) = starter.start(&self.backend, message.data).await {
            error!(starter = message.starter, "starter failed: {err}");
        }
    }
}
