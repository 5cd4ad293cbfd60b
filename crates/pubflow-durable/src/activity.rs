//! Activity runtime.
//!
//! An activity is an idempotent unit of work with declared timeouts and a
//! classified outcome. Expected failures are expressed as [`Outcome`]
//! values, never as errors; returning `Err` is reserved for unexpected
//! programmer errors and maps to a permanent failure with the chain logged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backend::{BackendError, HeartbeatAck, WorkflowBackend};
use crate::workflow::TaskTimeouts;
use pubflow_core::monitor::Monitor;
use pubflow_core::session::{Session, SessionStore};

/// Classified result of one activity execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Work done; the decider moves to the next step.
    Success(Value),

    /// Transient failure; the backend retries per the step policy.
    TemporaryFailure(String),

    /// Unrecoverable failure; the workflow fails.
    PermanentFailure(String),

    /// Do not report a result; the activity owns heartbeats from here.
    Deferred,
}

impl Outcome {
    /// Plain success carrying `true`, the common case.
    pub fn success() -> Self {
        Self::Success(Value::Bool(true))
    }
}

/// A typed activity implementation.
///
/// Implementations are stateless apart from injected collaborators
/// (settings, stores, adapters) and are registered once per worker process.
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Activity type name the backend dispatches on.
    const NAME: &'static str;

    /// Human-readable name used in monitor events.
    const PRETTY_NAME: &'static str;

    type Input: DeserializeOwned + Send;

    /// Default timeouts; a workflow step may override them.
    fn timeouts(&self) -> TaskTimeouts {
        TaskTimeouts::default()
    }

    async fn do_activity(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> anyhow::Result<Outcome>;
}

/// Type-erased activity interface used by the worker loop.
#[async_trait]
pub trait ErasedActivity: Send + Sync {
    fn name(&self) -> &'static str;

    fn pretty_name(&self) -> &'static str;

    fn timeouts(&self) -> TaskTimeouts;

    async fn run(&self, ctx: &ActivityContext, input: Value) -> anyhow::Result<Outcome>;
}

struct Eraser<A: Activity> {
    inner: A,
}

#[async_trait]
impl<A: Activity> ErasedActivity for Eraser<A> {
    fn name(&self) -> &'static str {
        A::NAME
    }

    fn pretty_name(&self) -> &'static str {
        A::PRETTY_NAME
    }

    fn timeouts(&self) -> TaskTimeouts {
        self.inner.timeouts()
    }

    async fn run(&self, ctx: &ActivityContext, input: Value) -> anyhow::Result<Outcome> {
        let input: A::Input = match serde_json::from_value(input) {
            Ok(input) => input,
            // A malformed payload can never succeed on retry.
            Err(err) => {
                return Ok(Outcome::PermanentFailure(format!(
                    "input did not match the expected shape for {}: {err}",
                    A::NAME
                )))
            }
        };
        self.inner.do_activity(ctx, input).await
    }
}

/// Registry of activities, keyed by activity type name.
#[derive(Default)]
pub struct ActivityRegistry {
    activities: std::collections::HashMap<String, Arc<dyn ErasedActivity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A: Activity>(&mut self, activity: A) {
        self.activities
            .insert(A::NAME.to_string(), Arc::new(Eraser { inner: activity }));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ErasedActivity>> {
        self.activities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.activities.contains_key(name)
    }

    pub fn activity_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.activities.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Scoped tmp/input/output directories for one activity execution.
///
/// Backed by a [`tempfile::TempDir`]; everything is removed when the context
/// drops, on every exit path.
pub struct ActivityDirs {
    root: tempfile::TempDir,
    tmp: PathBuf,
    input: PathBuf,
    output: PathBuf,
}

impl ActivityDirs {
    pub fn create() -> std::io::Result<Self> {
        let root = tempfile::tempdir()?;
        let tmp = root.path().join("tmp_dir");
        let input = root.path().join("input_dir");
        let output = root.path().join("output_dir");
        for dir in [&tmp, &input, &output] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self {
            root,
            tmp,
            input,
            output,
        })
    }
}

/// Everything an activity execution can reach.
pub struct ActivityContext {
    pub run: String,
    pub workflow_id: String,
    pub activity_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    task_token: String,
    backend: Arc<dyn WorkflowBackend>,
    dirs: ActivityDirs,
    session_store: Arc<dyn SessionStore>,
    pub monitor: Monitor,
}

impl ActivityContext {
    pub fn new(
        backend: Arc<dyn WorkflowBackend>,
        session_store: Arc<dyn SessionStore>,
        monitor: Monitor,
        run: impl Into<String>,
        workflow_id: impl Into<String>,
        activity_id: impl Into<String>,
        task_token: impl Into<String>,
        attempt: u32,
    ) -> std::io::Result<Self> {
        Ok(Self {
            run: run.into(),
            workflow_id: workflow_id.into(),
            activity_id: activity_id.into(),
            attempt,
            task_token: task_token.into(),
            backend,
            dirs: ActivityDirs::create()?,
            session_store,
            monitor,
        })
    }

    /// Session handle bound to this run.
    pub fn session(&self) -> Session {
        Session::new(self.session_store.clone(), self.run.clone())
    }

    /// Record a heartbeat; long activities call this to stay claimed.
    pub async fn heartbeat(&self) -> Result<HeartbeatAck, BackendError> {
        self.backend.record_heartbeat(&self.task_token).await
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.dirs.tmp
    }

    pub fn input_dir(&self) -> &Path {
        &self.dirs.input
    }

    pub fn output_dir(&self) -> &Path {
        &self.dirs.output
    }

    /// Root of the scoped scratch space (removed on drop).
    pub fn scratch_root(&self) -> &Path {
        self.dirs.root.path()
    }
}
