//! Activity worker loop.
//!
//! Long-polls the activity task list, dispatches each task to its activity
//! by type name, and reports the classified outcome. A `Deferred` outcome
//! reports nothing; the activity has taken ownership of heartbeats.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::activity::{ActivityContext, ActivityRegistry, Outcome};
use crate::backend::WorkflowBackend;
use crate::flag::RunFlag;
use crate::workflow::{ActivityTask, FailureKind};
use pubflow_core::monitor::Monitor;
use pubflow_core::session::SessionStore;

/// The activity worker process.
pub struct Worker {
    backend: Arc<dyn WorkflowBackend>,
    registry: Arc<ActivityRegistry>,
    session_store: Arc<dyn SessionStore>,
    monitor: Monitor,
    task_list: String,
    identity: String,
    poll_wait: Duration,
}

impl Worker {
    pub fn new(
        backend: Arc<dyn WorkflowBackend>,
        registry: Arc<ActivityRegistry>,
        session_store: Arc<dyn SessionStore>,
        monitor: Monitor,
        task_list: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            registry,
            session_store,
            monitor,
            task_list: task_list.into(),
            identity: identity.into(),
            poll_wait: Duration::from_secs(60),
        }
    }

    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    /// Poll and execute until the flag is lowered.
    pub async fn run(&self, flag: RunFlag) {
        info!(identity = %self.identity, task_list = %self.task_list, "worker polling");
        while flag.green() {
            match self
                .backend
                .poll_activity_task(&self.task_list, &self.identity, self.poll_wait)
                .await
            {
                Ok(Some(task)) => self.dispatch(task).await,
                Ok(None) => {}
                Err(err) => {
                    error!("activity poll failed: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!(identity = %self.identity, "graceful shutdown");
    }

    async fn dispatch(&self, task: ActivityTask) {
        debug!(
            activity_type = %task.activity_type,
            workflow_id = %task.workflow_id,
            run = %task.run,
            attempt = task.attempt,
            "got activity task"
        );

        let Some(activity) = self.registry.get(&task.activity_type) else {
            warn!("no activity registered for type {}", task.activity_type);
            self.report_failed(
                &task,
                FailureKind::Permanent,
                &format!("unknown activity type {}", task.activity_type),
            )
            .await;
            return;
        };

        let ctx = match ActivityContext::new(
            self.backend.clone(),
            self.session_store.clone(),
            self.monitor.clone(),
            task.run.clone(),
            task.workflow_id.clone(),
            task.activity_id.clone(),
            task.task_token.clone(),
            task.attempt,
        ) {
            Ok(ctx) => ctx,
            Err(err) => {
                error!("could not create activity scratch dirs: {err}");
                self.report_failed(
                    &task,
                    FailureKind::Temporary,
                    &format!("scratch dir setup failed: {err}"),
                )
                .await;
                return;
            }
        };

        let outcome = match activity.run(&ctx, task.input.clone()).await {
            Ok(outcome) => outcome,
            // Unexpected errors are permanent: the activity did not classify
            // them, so a retry has no reason to behave differently.
            Err(err) => {
                error!(
                    activity_type = %task.activity_type,
                    run = %task.run,
                    "activity raised: {err:#}"
                );
                Outcome::PermanentFailure(format!("{err:#}"))
            }
        };

        match outcome {
            Outcome::Success(result) => {
                info!(activity_type = %task.activity_type, run = %task.run, "activity success");
                if let Err(err) = self
                    .backend
                    .respond_activity_completed(&task.task_token, result)
                    .await
                {
                    error!("could not report activity completion: {err}");
                }
            }
            Outcome::TemporaryFailure(message) => {
                warn!(activity_type = %task.activity_type, run = %task.run, "temporary failure: {message}");
                self.report_failed(&task, FailureKind::Temporary, &message)
                    .await;
            }
            Outcome::PermanentFailure(message) => {
                warn!(activity_type = %task.activity_type, run = %task.run, "permanent failure: {message}");
                self.report_failed(&task, FailureKind::Permanent, &message)
                    .await;
            }
            Outcome::Deferred => {
                debug!(activity_type = %task.activity_type, run = %task.run, "outcome deferred");
            }
        }
    }

    async fn report_failed(&self, task: &ActivityTask, kind: FailureKind, message: &str) {
        if let Err(err) = self
            .backend
            .respond_activity_failed(&task.task_token, kind, message)
            .await
        {
            error!("could not report activity failure: {err}");
        }
    }
}
