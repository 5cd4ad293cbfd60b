//! In-memory workflow backend.
//!
//! Implements the [`WorkflowBackend`] semantics for tests and local runs:
//! append-only history per execution, decision/activity task queues with
//! long-poll wakeups, retry bookkeeping for temporary failures, and
//! workflow-id uniqueness among open executions. Task lists are collapsed
//! into one logical list.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::backend::{
    BackendError, Decision, HeartbeatAck, StartError, StartRequest, WorkflowBackend,
};
use crate::workflow::{ActivityTask, DecisionTask, FailureKind, HistoryEvent, HistoryPage};

/// Status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Open,
    Completed,
    Failed,
}

struct ExecutionState {
    workflow_id: String,
    workflow_type: String,
    input: Value,
    status: ExecutionStatus,
    history: Vec<HistoryEvent>,
}

#[derive(Debug, Clone)]
struct PendingActivity {
    run: String,
    workflow_id: String,
    activity_id: String,
    activity_type: String,
    input: Value,
    attempt: u32,
    max_attempts: u32,
}

/// In-memory implementation of [`WorkflowBackend`].
pub struct InMemoryBackend {
    /// Max events per decision-task page; `None` delivers full histories.
    page_size: Option<usize>,
    executions: RwLock<HashMap<String, ExecutionState>>,
    decision_queue: Mutex<VecDeque<String>>,
    decision_notify: Notify,
    activity_queue: Mutex<VecDeque<PendingActivity>>,
    activity_notify: Notify,
    decision_tokens: Mutex<HashMap<String, String>>,
    activity_tokens: Mutex<HashMap<String, PendingActivity>>,
    token_counter: AtomicU64,
    completed_at: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            page_size: None,
            executions: RwLock::new(HashMap::new()),
            decision_queue: Mutex::new(VecDeque::new()),
            decision_notify: Notify::new(),
            activity_queue: Mutex::new(VecDeque::new()),
            activity_notify: Notify::new(),
            decision_tokens: Mutex::new(HashMap::new()),
            activity_tokens: Mutex::new(HashMap::new()),
            token_counter: AtomicU64::new(0),
            completed_at: RwLock::new(HashMap::new()),
        }
    }

    /// Deliver histories in pages of `page_size` events.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    fn next_token(&self, prefix: &str) -> String {
        format!(
            "{prefix}-{:08}",
            self.token_counter.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn page(&self, history: &[HistoryEvent], offset: usize, run: &str) -> HistoryPage {
        match self.page_size {
            Some(size) if offset + size < history.len() => HistoryPage {
                events: history[offset..offset + size].to_vec(),
                next_page_token: Some(format!("{run}:{}", offset + size)),
            },
            _ => HistoryPage {
                events: history[offset.min(history.len())..].to_vec(),
                next_page_token: None,
            },
        }
    }

    // ------------------------------------------------------------------
    // Test and inspection helpers
    // ------------------------------------------------------------------

    /// Run id of the newest execution with this workflow id.
    pub fn run_for(&self, workflow_id: &str) -> Option<String> {
        let executions = self.executions.read();
        let mut runs: Vec<&String> = executions
            .iter()
            .filter(|(_, state)| state.workflow_id == workflow_id)
            .map(|(run, _)| run)
            .collect();
        runs.sort();
        runs.last().map(|s| s.to_string())
    }

    pub fn execution_status(&self, run: &str) -> Option<ExecutionStatus> {
        self.executions.read().get(run).map(|state| state.status)
    }

    pub fn history(&self, run: &str) -> Vec<HistoryEvent> {
        self.executions
            .read()
            .get(run)
            .map(|state| state.history.clone())
            .unwrap_or_default()
    }

    /// Activity types in the order they were scheduled for one run.
    pub fn scheduled_activity_types(&self, run: &str) -> Vec<String> {
        self.history(run)
            .into_iter()
            .filter_map(|event| match event {
                HistoryEvent::ActivityTaskScheduled { activity_type, .. } => Some(activity_type),
                _ => None,
            })
            .collect()
    }

    pub fn open_execution_count(&self) -> usize {
        self.executions
            .read()
            .values()
            .filter(|state| state.status == ExecutionStatus::Open)
            .count()
    }

    /// Seed the completion timestamp the cron gate queries.
    pub fn set_last_completed(&self, workflow_id: &str, at: DateTime<Utc>) {
        self.completed_at
            .write()
            .insert(workflow_id.to_string(), at);
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowBackend for InMemoryBackend {
    async fn start_workflow_execution(&self, request: StartRequest) -> Result<String, StartError> {
        let mut executions = self.executions.write();

        let already_open = executions.values().any(|state| {
            state.workflow_id == request.workflow_id && state.status == ExecutionStatus::Open
        });
        if already_open {
            return Err(StartError::AlreadyStarted {
                workflow_id: request.workflow_id,
            });
        }

        let run = Uuid::now_v7().to_string();
        executions.insert(
            run.clone(),
            ExecutionState {
                workflow_id: request.workflow_id,
                workflow_type: request.workflow_type,
                input: request.input.clone(),
                status: ExecutionStatus::Open,
                history: vec![HistoryEvent::WorkflowExecutionStarted {
                    input: request.input,
                }],
            },
        );
        drop(executions);

        self.decision_queue.lock().push_back(run.clone());
        self.decision_notify.notify_waiters();
        Ok(run)
    }

    async fn poll_decision_task(
        &self,
        _task_list: &str,
        _identity: &str,
        wait: Duration,
    ) -> Result<Option<DecisionTask>, BackendError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(run) = self.decision_queue.lock().pop_front() {
                let executions = self.executions.read();
                let Some(state) = executions.get(&run) else {
                    continue;
                };
                if state.status != ExecutionStatus::Open {
                    continue;
                }

                let token = self.next_token("dtask");
                let first_page = self.page(&state.history, 0, &run);
                let task = DecisionTask {
                    task_token: token.clone(),
                    workflow_type: state.workflow_type.clone(),
                    workflow_id: state.workflow_id.clone(),
                    run: run.clone(),
                    input: state.input.clone(),
                    events: first_page.events,
                    next_page_token: first_page.next_page_token,
                };
                drop(executions);

                self.decision_tokens.lock().insert(token, run);
                return Ok(Some(task));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, self.decision_notify.notified()).await;
        }
    }

    async fn poll_history_page(
        &self,
        task_token: &str,
        page_token: &str,
    ) -> Result<HistoryPage, BackendError> {
        let run = self
            .decision_tokens
            .lock()
            .get(task_token)
            .cloned()
            .ok_or_else(|| BackendError::UnknownToken(task_token.to_string()))?;

        let offset: usize = page_token
            .rsplit(':')
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| BackendError::UnknownPageToken(page_token.to_string()))?;

        let executions = self.executions.read();
        let state = executions
            .get(&run)
            .ok_or_else(|| BackendError::UnknownToken(task_token.to_string()))?;
        Ok(self.page(&state.history, offset, &run))
    }

    async fn respond_decisions(
        &self,
        task_token: &str,
        decisions: Vec<Decision>,
    ) -> Result<(), BackendError> {
        let run = self
            .decision_tokens
            .lock()
            .remove(task_token)
            .ok_or_else(|| BackendError::UnknownToken(task_token.to_string()))?;

        let mut scheduled = Vec::new();
        {
            let mut executions = self.executions.write();
            let state = executions
                .get_mut(&run)
                .ok_or_else(|| BackendError::UnknownToken(task_token.to_string()))?;

            for decision in decisions {
                match decision {
                    Decision::ScheduleActivityTask { step } => {
                        state.history.push(HistoryEvent::ActivityTaskScheduled {
                            activity_id: step.activity_id.clone(),
                            activity_type: step.activity_type.clone(),
                            input: step.input.clone(),
                        });
                        scheduled.push(PendingActivity {
                            run: run.clone(),
                            workflow_id: state.workflow_id.clone(),
                            activity_id: step.activity_id,
                            activity_type: step.activity_type,
                            input: step.input,
                            attempt: 1,
                            max_attempts: step.retry.max_attempts.max(1),
                        });
                    }
                    Decision::CompleteWorkflowExecution => {
                        state.history.push(HistoryEvent::WorkflowExecutionCompleted);
                        state.status = ExecutionStatus::Completed;
                        self.completed_at
                            .write()
                            .insert(state.workflow_id.clone(), Utc::now());
                    }
                    Decision::FailWorkflowExecution { reason } => {
                        state
                            .history
                            .push(HistoryEvent::WorkflowExecutionFailed { reason });
                        state.status = ExecutionStatus::Failed;
                    }
                }
            }
        }

        if !scheduled.is_empty() {
            let mut queue = self.activity_queue.lock();
            for pending in scheduled {
                queue.push_back(pending);
            }
            drop(queue);
            self.activity_notify.notify_waiters();
        }
        Ok(())
    }

    async fn poll_activity_task(
        &self,
        _task_list: &str,
        _identity: &str,
        wait: Duration,
    ) -> Result<Option<ActivityTask>, BackendError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(pending) = self.activity_queue.lock().pop_front() {
                {
                    let mut executions = self.executions.write();
                    if let Some(state) = executions.get_mut(&pending.run) {
                        state.history.push(HistoryEvent::ActivityTaskStarted {
                            activity_id: pending.activity_id.clone(),
                            attempt: pending.attempt,
                        });
                    }
                }

                let token = self.next_token("atask");
                let task = ActivityTask {
                    task_token: token.clone(),
                    activity_type: pending.activity_type.clone(),
                    activity_id: pending.activity_id.clone(),
                    workflow_id: pending.workflow_id.clone(),
                    run: pending.run.clone(),
                    input: pending.input.clone(),
                    attempt: pending.attempt,
                };
                self.activity_tokens.lock().insert(token, pending);
                return Ok(Some(task));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, self.activity_notify.notified()).await;
        }
    }

    async fn respond_activity_completed(
        &self,
        task_token: &str,
        result: Value,
    ) -> Result<(), BackendError> {
        let pending = self
            .activity_tokens
            .lock()
            .remove(task_token)
            .ok_or_else(|| BackendError::UnknownToken(task_token.to_string()))?;

        {
            let mut executions = self.executions.write();
            if let Some(state) = executions.get_mut(&pending.run) {
                state.history.push(HistoryEvent::ActivityTaskCompleted {
                    activity_id: pending.activity_id,
                    result,
                });
            }
        }

        self.decision_queue.lock().push_back(pending.run);
        self.decision_notify.notify_waiters();
        Ok(())
    }

    async fn respond_activity_failed(
        &self,
        task_token: &str,
        kind: FailureKind,
        message: &str,
    ) -> Result<(), BackendError> {
        let pending = self
            .activity_tokens
            .lock()
            .remove(task_token)
            .ok_or_else(|| BackendError::UnknownToken(task_token.to_string()))?;

        let retry = kind == FailureKind::Temporary && pending.attempt < pending.max_attempts;
        if retry {
            let mut next = pending;
            next.attempt += 1;
            self.activity_queue.lock().push_back(next);
            self.activity_notify.notify_waiters();
            return Ok(());
        }

        {
            let mut executions = self.executions.write();
            if let Some(state) = executions.get_mut(&pending.run) {
                state.history.push(HistoryEvent::ActivityTaskFailed {
                    activity_id: pending.activity_id,
                    reason: kind,
                    message: message.to_string(),
                });
            }
        }

        self.decision_queue.lock().push_back(pending.run);
        self.decision_notify.notify_waiters();
        Ok(())
    }

    async fn record_heartbeat(&self, task_token: &str) -> Result<HeartbeatAck, BackendError> {
        if !self.activity_tokens.lock().contains_key(task_token) {
            return Err(BackendError::UnknownToken(task_token.to_string()));
        }
        Ok(HeartbeatAck {
            cancel_requested: false,
        })
    }

    async fn last_completed_at(
        &self,
        workflow_id: &str,
    ) -> Result<Option<DateTime<Utc>>, BackendError> {
        Ok(self.completed_at.read().get(workflow_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowStep;
    use serde_json::json;

    const WAIT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn start_enqueues_decision_task() {
        let backend = InMemoryBackend::new();
        let run = backend
            .start_workflow_execution(StartRequest::new("Ping_1", "Ping", json!({"n": 1})))
            .await
            .unwrap();

        let task = backend
            .poll_decision_task("default", "decider-test", WAIT)
            .await
            .unwrap()
            .expect("decision task pending");
        assert_eq!(task.run, run);
        assert_eq!(task.workflow_type, "Ping");
        assert_eq!(task.events.len(), 1);
        assert!(matches!(
            task.events[0],
            HistoryEvent::WorkflowExecutionStarted { .. }
        ));
    }

    #[tokio::test]
    async fn duplicate_workflow_id_is_rejected_while_open() {
        let backend = InMemoryBackend::new();
        backend
            .start_workflow_execution(StartRequest::new("AdminEmail", "AdminEmail", json!({})))
            .await
            .unwrap();

        let second = backend
            .start_workflow_execution(StartRequest::new("AdminEmail", "AdminEmail", json!({})))
            .await;
        assert!(matches!(second, Err(StartError::AlreadyStarted { .. })));
        assert_eq!(backend.open_execution_count(), 1);
    }

    #[tokio::test]
    async fn schedule_complete_round_trip() {
        let backend = InMemoryBackend::new();
        let run = backend
            .start_workflow_execution(StartRequest::new("W_1", "W", json!({})))
            .await
            .unwrap();

        let decision_task = backend
            .poll_decision_task("default", "d", WAIT)
            .await
            .unwrap()
            .unwrap();
        backend
            .respond_decisions(
                &decision_task.task_token,
                vec![Decision::ScheduleActivityTask {
                    step: WorkflowStep::new("Ping", json!({})),
                }],
            )
            .await
            .unwrap();

        let activity_task = backend
            .poll_activity_task("default", "w", WAIT)
            .await
            .unwrap()
            .expect("activity task pending");
        assert_eq!(activity_task.activity_type, "Ping");
        assert_eq!(activity_task.attempt, 1);

        backend
            .respond_activity_completed(&activity_task.task_token, json!(true))
            .await
            .unwrap();

        let next_decision = backend
            .poll_decision_task("default", "d", WAIT)
            .await
            .unwrap()
            .expect("follow-up decision task");
        backend
            .respond_decisions(
                &next_decision.task_token,
                vec![Decision::CompleteWorkflowExecution],
            )
            .await
            .unwrap();

        assert_eq!(
            backend.execution_status(&run),
            Some(ExecutionStatus::Completed)
        );
        assert!(backend
            .last_completed_at("W_1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn temporary_failures_retry_until_exhausted() {
        let backend = InMemoryBackend::new();
        backend
            .start_workflow_execution(StartRequest::new("W_2", "W", json!({})))
            .await
            .unwrap();
        let decision_task = backend
            .poll_decision_task("default", "d", WAIT)
            .await
            .unwrap()
            .unwrap();

        let step = WorkflowStep::new("Flaky", json!({}))
            .with_retry(crate::retry::RetryPolicy::fixed(Duration::ZERO, 2));
        backend
            .respond_decisions(
                &decision_task.task_token,
                vec![Decision::ScheduleActivityTask { step }],
            )
            .await
            .unwrap();

        // First attempt fails temporarily: requeued, no decision task yet.
        let first = backend
            .poll_activity_task("default", "w", WAIT)
            .await
            .unwrap()
            .unwrap();
        backend
            .respond_activity_failed(&first.task_token, FailureKind::Temporary, "remote 500")
            .await
            .unwrap();

        let second = backend
            .poll_activity_task("default", "w", WAIT)
            .await
            .unwrap()
            .expect("retried task");
        assert_eq!(second.attempt, 2);

        // Second temporary failure exhausts the policy.
        backend
            .respond_activity_failed(&second.task_token, FailureKind::Temporary, "remote 500")
            .await
            .unwrap();

        let run = backend.run_for("W_2").unwrap();
        let failed = backend.history(&run).into_iter().any(|event| {
            matches!(event, HistoryEvent::ActivityTaskFailed { reason, .. } if reason == FailureKind::Temporary)
        });
        assert!(failed, "exhausted retries surface an ActivityTaskFailed event");
    }

    #[tokio::test]
    async fn permanent_failures_do_not_retry() {
        let backend = InMemoryBackend::new();
        backend
            .start_workflow_execution(StartRequest::new("W_3", "W", json!({})))
            .await
            .unwrap();
        let decision_task = backend
            .poll_decision_task("default", "d", WAIT)
            .await
            .unwrap()
            .unwrap();
        backend
            .respond_decisions(
                &decision_task.task_token,
                vec![Decision::ScheduleActivityTask {
                    step: WorkflowStep::new("Broken", json!({})),
                }],
            )
            .await
            .unwrap();

        let task = backend
            .poll_activity_task("default", "w", WAIT)
            .await
            .unwrap()
            .unwrap();
        backend
            .respond_activity_failed(&task.task_token, FailureKind::Permanent, "bad input")
            .await
            .unwrap();

        assert!(backend
            .poll_activity_task("default", "w", WAIT)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn history_pages_chain() {
        let backend = InMemoryBackend::new().with_page_size(2);
        backend
            .start_workflow_execution(StartRequest::new("W_4", "W", json!({})))
            .await
            .unwrap();

        // Grow the history past one page.
        let decision_task = backend
            .poll_decision_task("default", "d", WAIT)
            .await
            .unwrap()
            .unwrap();
        backend
            .respond_decisions(
                &decision_task.task_token,
                vec![Decision::ScheduleActivityTask {
                    step: WorkflowStep::new("Ping", json!({})),
                }],
            )
            .await
            .unwrap();
        let activity_task = backend
            .poll_activity_task("default", "w", WAIT)
            .await
            .unwrap()
            .unwrap();
        backend
            .respond_activity_completed(&activity_task.task_token, json!(true))
            .await
            .unwrap();

        let paged = backend
            .poll_decision_task("default", "d", WAIT)
            .await
            .unwrap()
            .expect("paged decision task");
        assert_eq!(paged.events.len(), 2);
        let token = paged.next_page_token.clone().expect("more pages");

        let mut events = paged.events.clone();
        let mut next = Some(token);
        while let Some(page_token) = next {
            let page = backend
                .poll_history_page(&paged.task_token, &page_token)
                .await
                .unwrap();
            events.extend(page.events);
            next = page.next_page_token;
        }
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events.last(),
            Some(HistoryEvent::ActivityTaskCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn heartbeat_requires_live_token() {
        let backend = InMemoryBackend::new();
        assert!(matches!(
            backend.record_heartbeat("atask-bogus").await,
            Err(BackendError::UnknownToken(_))
        ));
    }
}
