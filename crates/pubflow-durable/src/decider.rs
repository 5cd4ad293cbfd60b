//! Decider loop.
//!
//! Long-polls the decision task list, folds each task's event history to a
//! position in the workflow's step graph, and responds with the next
//! decision. Per-task errors are logged and never crash the loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, Decision, WorkflowBackend};
use crate::flag::RunFlag;
use crate::workflow::{DecisionTask, DefinitionRegistry, HistoryEvent, WorkflowDefinition};

/// Error from handling one decision task.
#[derive(Debug, thiserror::Error)]
pub enum DeciderError {
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Fold an event history to the decisions that advance the workflow.
///
/// Unknown event kinds are ignored. An empty vector means there is nothing
/// to decide yet (an activity is still in flight).
pub fn next_decisions(definition: &WorkflowDefinition, events: &[HistoryEvent]) -> Vec<Decision> {
    let mut last_scheduled: Option<&str> = None;
    for event in events {
        if let HistoryEvent::ActivityTaskScheduled { activity_id, .. } = event {
            last_scheduled = Some(activity_id);
        }
    }

    // Initial state: nothing scheduled yet.
    let Some(current_id) = last_scheduled else {
        return match definition.first_step() {
            Some(step) => vec![Decision::ScheduleActivityTask { step: step.clone() }],
            None => vec![Decision::CompleteWorkflowExecution],
        };
    };

    // Find the terminal event for the in-flight step, if any.
    let mut terminal: Option<&HistoryEvent> = None;
    for event in events {
        match event {
            HistoryEvent::ActivityTaskCompleted { activity_id, .. }
            | HistoryEvent::ActivityTaskFailed { activity_id, .. }
            | HistoryEvent::ActivityTaskTimedOut { activity_id, .. }
                if activity_id == current_id =>
            {
                terminal = Some(event);
            }
            _ => {}
        }
    }

    match terminal {
        None => vec![],

        Some(HistoryEvent::ActivityTaskCompleted { .. }) => {
            match definition.step_index(current_id) {
                None => vec![Decision::FailWorkflowExecution {
                    reason: format!("activity id {current_id} is not in the workflow definition"),
                }],
                Some(index) => match definition.steps.get(index + 1) {
                    Some(step) => vec![Decision::ScheduleActivityTask { step: step.clone() }],
                    None => vec![Decision::CompleteWorkflowExecution],
                },
            }
        }

        Some(HistoryEvent::ActivityTaskFailed { message, .. }) => {
            vec![Decision::FailWorkflowExecution {
                reason: format!("activity {current_id} failed: {message}"),
            }]
        }

        Some(HistoryEvent::ActivityTaskTimedOut { timeout_type, .. }) => {
            vec![Decision::FailWorkflowExecution {
                reason: format!("activity {current_id} timed out: {timeout_type}"),
            }]
        }

        Some(_) => vec![],
    }
}

/// The decider process.
pub struct Decider {
    backend: Arc<dyn WorkflowBackend>,
    registry: Arc<DefinitionRegistry>,
    task_list: String,
    identity: String,
    poll_wait: Duration,
}

impl Decider {
    pub fn new(
        backend: Arc<dyn WorkflowBackend>,
        registry: Arc<DefinitionRegistry>,
        task_list: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            registry,
            task_list: task_list.into(),
            identity: identity.into(),
            poll_wait: Duration::from_secs(60),
        }
    }

    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    /// Poll and decide until the flag is lowered.
    pub async fn run(&self, flag: RunFlag) {
        info!(identity = %self.identity, task_list = %self.task_list, "decider polling");
        while flag.green() {
            match self
                .backend
                .poll_decision_task(&self.task_list, &self.identity, self.poll_wait)
                .await
            {
                Ok(Some(task)) => {
                    debug!(workflow_id = %task.workflow_id, run = %task.run, "got decision task");
                    if let Err(err) = self.handle_task(task).await {
                        error!("error processing workflow decision: {err}");
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    error!("decision poll failed: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!(identity = %self.identity, "graceful shutdown");
    }

    async fn handle_task(&self, mut task: DecisionTask) -> Result<(), DeciderError> {
        // Concatenate paged history before deciding.
        while let Some(page_token) = task.next_page_token.take() {
            let page = self
                .backend
                .poll_history_page(&task.task_token, &page_token)
                .await?;
            task.events.extend(page.events);
            task.next_page_token = page.next_page_token;
        }

        let definition = match self
            .registry
            .create(&task.workflow_type, task.input.clone())
        {
            Ok(definition) => definition,
            Err(err) => {
                warn!(
                    workflow_id = %task.workflow_id,
                    "could not load workflow type {}: {err}", task.workflow_type
                );
                self.backend
                    .respond_decisions(
                        &task.task_token,
                        vec![Decision::FailWorkflowExecution {
                            reason: format!("unknown workflow type {}", task.workflow_type),
                        }],
                    )
                    .await?;
                return Ok(());
            }
        };

        let decisions = next_decisions(&definition, &task.events);
        for decision in &decisions {
            match decision {
                Decision::ScheduleActivityTask { step } => {
                    info!(
                        workflow_id = %task.workflow_id,
                        run = %task.run,
                        "scheduling task: {}", step.activity_type
                    );
                }
                Decision::CompleteWorkflowExecution => {
                    info!(workflow_id = %task.workflow_id, run = %task.run, "workflow complete");
                }
                Decision::FailWorkflowExecution { reason } => {
                    warn!(workflow_id = %task.workflow_id, run = %task.run, "failing workflow: {reason}");
                }
            }
        }

        self.backend
            .respond_decisions(&task.task_token, decisions)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{FailureKind, WorkflowStep};
    use serde_json::json;
    use std::time::Duration as StdDuration;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "Sample".into(),
            version: "1".into(),
            task_list: "default".into(),
            execution_timeout: StdDuration::from_secs(60),
            steps: vec![
                WorkflowStep::new("Ping", json!({})),
                WorkflowStep::new("Deposit", json!({})),
            ],
        }
    }

    fn started() -> HistoryEvent {
        HistoryEvent::WorkflowExecutionStarted { input: json!({}) }
    }

    fn scheduled(id: &str) -> HistoryEvent {
        HistoryEvent::ActivityTaskScheduled {
            activity_id: id.into(),
            activity_type: id.into(),
            input: json!({}),
        }
    }

    fn completed(id: &str) -> HistoryEvent {
        HistoryEvent::ActivityTaskCompleted {
            activity_id: id.into(),
            result: json!(true),
        }
    }

    #[test]
    fn initial_state_schedules_step_zero() {
        let decisions = next_decisions(&definition(), &[started()]);
        match &decisions[..] {
            [Decision::ScheduleActivityTask { step }] => assert_eq!(step.activity_type, "Ping"),
            other => panic!("unexpected decisions: {other:?}"),
        }
    }

    #[test]
    fn empty_definition_completes_immediately() {
        let mut empty = definition();
        empty.steps.clear();
        let decisions = next_decisions(&empty, &[started()]);
        assert!(matches!(
            decisions[..],
            [Decision::CompleteWorkflowExecution]
        ));
    }

    #[test]
    fn success_schedules_the_next_step() {
        let events = vec![started(), scheduled("Ping"), completed("Ping")];
        let decisions = next_decisions(&definition(), &events);
        match &decisions[..] {
            [Decision::ScheduleActivityTask { step }] => {
                assert_eq!(step.activity_type, "Deposit")
            }
            other => panic!("unexpected decisions: {other:?}"),
        }
    }

    #[test]
    fn last_step_success_completes_the_execution() {
        let events = vec![
            started(),
            scheduled("Ping"),
            completed("Ping"),
            scheduled("Deposit"),
            completed("Deposit"),
        ];
        let decisions = next_decisions(&definition(), &events);
        assert!(matches!(
            decisions[..],
            [Decision::CompleteWorkflowExecution]
        ));
    }

    #[test]
    fn failure_fails_the_workflow() {
        let events = vec![
            started(),
            scheduled("Ping"),
            HistoryEvent::ActivityTaskFailed {
                activity_id: "Ping".into(),
                reason: FailureKind::Permanent,
                message: "bad input".into(),
            },
        ];
        let decisions = next_decisions(&definition(), &events);
        match &decisions[..] {
            [Decision::FailWorkflowExecution { reason }] => {
                assert!(reason.contains("Ping"));
                assert!(reason.contains("bad input"));
            }
            other => panic!("unexpected decisions: {other:?}"),
        }
    }

    #[test]
    fn in_flight_step_yields_no_decision() {
        let events = vec![
            started(),
            scheduled("Ping"),
            HistoryEvent::ActivityTaskStarted {
                activity_id: "Ping".into(),
                attempt: 1,
            },
        ];
        assert!(next_decisions(&definition(), &events).is_empty());
    }

    #[test]
    fn unknown_events_are_ignored() {
        let events = vec![
            started(),
            HistoryEvent::Unknown,
            scheduled("Ping"),
            HistoryEvent::TimerFired {
                timer_id: "t".into(),
            },
            HistoryEvent::SignalReceived { name: "s".into() },
            completed("Ping"),
            HistoryEvent::Unknown,
        ];
        let decisions = next_decisions(&definition(), &events);
        match &decisions[..] {
            [Decision::ScheduleActivityTask { step }] => {
                assert_eq!(step.activity_type, "Deposit")
            }
            other => panic!("unexpected decisions: {other:?}"),
        }
    }

    #[test]
    fn timeout_fails_the_workflow() {
        let events = vec![
            started(),
            scheduled("Deposit"),
            HistoryEvent::ActivityTaskTimedOut {
                activity_id: "Deposit".into(),
                timeout_type: "heartbeat".into(),
            },
        ];
        let decisions = next_decisions(&definition(), &events);
        assert!(matches!(
            decisions[..],
            [Decision::FailWorkflowExecution { .. }]
        ));
    }
}
