//! Workflow backend trait.
//!
//! The managed workflow service is consumed through this surface only:
//! starting executions, long-polling decision and activity tasks,
//! responding with decisions or outcomes, heartbeats, and the completion
//! timestamp query the cron scheduler gates on.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::workflow::{
    ActivityTask, DecisionTask, FailureKind, HistoryPage, WorkflowStep,
};

/// Error starting a workflow execution.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// An execution with this workflow id is already running.
    #[error("workflow execution already started: {workflow_id}")]
    AlreadyStarted { workflow_id: String },

    #[error("backend error: {0}")]
    Backend(String),
}

/// Error from backend task operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown task token: {0}")]
    UnknownToken(String),

    #[error("unknown history page token: {0}")]
    UnknownPageToken(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Request to start one workflow execution.
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Stable, content-derived id; the backend enforces uniqueness among
    /// open executions.
    pub workflow_id: String,
    pub workflow_type: String,
    pub workflow_version: String,
    pub task_list: String,
    pub input: Value,
    pub execution_timeout: Option<Duration>,
}

impl StartRequest {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_type: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_type: workflow_type.into(),
            workflow_version: "1".into(),
            task_list: "default".into(),
            input,
            execution_timeout: None,
        }
    }

    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = task_list.into();
        self
    }
}

/// Decisions a decider can respond with.
#[derive(Debug, Clone)]
pub enum Decision {
    ScheduleActivityTask { step: WorkflowStep },
    CompleteWorkflowExecution,
    FailWorkflowExecution { reason: String },
}

/// Acknowledgement of a recorded heartbeat.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatAck {
    /// The backend requests the activity stop promptly.
    pub cancel_requested: bool,
}

/// The long-poll task backend every process stands on.
#[async_trait]
pub trait WorkflowBackend: Send + Sync + 'static {
    /// Start an execution; returns the fresh run id.
    async fn start_workflow_execution(&self, request: StartRequest) -> Result<String, StartError>;

    /// Long-poll the decision task list. `None` means the poll timed out.
    async fn poll_decision_task(
        &self,
        task_list: &str,
        identity: &str,
        wait: Duration,
    ) -> Result<Option<DecisionTask>, BackendError>;

    /// Fetch an additional page of history for a held decision task.
    async fn poll_history_page(
        &self,
        task_token: &str,
        page_token: &str,
    ) -> Result<HistoryPage, BackendError>;

    /// Respond to a decision task with zero or more decisions.
    async fn respond_decisions(
        &self,
        task_token: &str,
        decisions: Vec<Decision>,
    ) -> Result<(), BackendError>;

    /// Long-poll the activity task list. `None` means the poll timed out.
    async fn poll_activity_task(
        &self,
        task_list: &str,
        identity: &str,
        wait: Duration,
    ) -> Result<Option<ActivityTask>, BackendError>;

    async fn respond_activity_completed(
        &self,
        task_token: &str,
        result: Value,
    ) -> Result<(), BackendError>;

    async fn respond_activity_failed(
        &self,
        task_token: &str,
        kind: FailureKind,
        message: &str,
    ) -> Result<(), BackendError>;

    /// Record a heartbeat for a running activity task.
    async fn record_heartbeat(&self, task_token: &str) -> Result<HeartbeatAck, BackendError>;

    /// When an execution with this workflow id last completed, if ever.
    async fn last_completed_at(
        &self,
        workflow_id: &str,
    ) -> Result<Option<DateTime<Utc>>, BackendError>;
}
