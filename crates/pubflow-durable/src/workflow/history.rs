//! History events and backend-delivered tasks.
//!
//! The backend stores each execution as an append-only event history. The
//! decider folds that history to a position in the step graph; it must
//! ignore event kinds it does not know.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a failure should be retried by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Temporary,
    Permanent,
}

/// Events recorded in an execution's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    WorkflowExecutionStarted {
        input: Value,
    },

    WorkflowExecutionCompleted,

    WorkflowExecutionFailed {
        reason: String,
    },

    ActivityTaskScheduled {
        activity_id: String,
        activity_type: String,
        input: Value,
    },

    ActivityTaskStarted {
        activity_id: String,
        attempt: u32,
    },

    ActivityTaskCompleted {
        activity_id: String,
        result: Value,
    },

    /// Recorded once retries are exhausted (or the failure is permanent).
    ActivityTaskFailed {
        activity_id: String,
        reason: FailureKind,
        message: String,
    },

    ActivityTaskTimedOut {
        activity_id: String,
        timeout_type: String,
    },

    TimerFired {
        timer_id: String,
    },

    SignalReceived {
        name: String,
    },

    /// Any event kind this build does not know about.
    #[serde(other)]
    Unknown,
}

impl HistoryEvent {
    /// The activity id, for activity-related events.
    pub fn activity_id(&self) -> Option<&str> {
        match self {
            Self::ActivityTaskScheduled { activity_id, .. }
            | Self::ActivityTaskStarted { activity_id, .. }
            | Self::ActivityTaskCompleted { activity_id, .. }
            | Self::ActivityTaskFailed { activity_id, .. }
            | Self::ActivityTaskTimedOut { activity_id, .. } => Some(activity_id),
            _ => None,
        }
    }
}

/// A decision task delivered by the backend.
///
/// `events` may be partial; when `next_page_token` is present the decider
/// fetches and concatenates the remaining pages before deciding.
#[derive(Debug, Clone)]
pub struct DecisionTask {
    pub task_token: String,
    pub workflow_type: String,
    pub workflow_id: String,
    pub run: String,
    pub input: Value,
    pub events: Vec<HistoryEvent>,
    pub next_page_token: Option<String>,
}

/// One page of history events.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub events: Vec<HistoryEvent>,
    pub next_page_token: Option<String>,
}

/// An activity task delivered by the backend.
#[derive(Debug, Clone)]
pub struct ActivityTask {
    pub task_token: String,
    pub activity_type: String,
    pub activity_id: String,
    pub workflow_id: String,
    pub run: String,
    pub input: Value,
    /// 1-based attempt number.
    pub attempt: u32,
}
