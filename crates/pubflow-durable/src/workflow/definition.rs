//! Declarative workflow definitions.
//!
//! A workflow is an ordered list of steps, each naming an activity type with
//! its timeouts and retry policy. Definitions are produced per execution by
//! factories registered in a [`DefinitionRegistry`] keyed by workflow type,
//! so an unknown type fails only the decision task that named it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::retry::RetryPolicy;

/// Timeouts declared per activity task.
///
/// An activity must report (or heartbeat) within `heartbeat`, be claimed
/// within `schedule_to_start`, finish within `start_to_close` once claimed,
/// and finish within `schedule_to_close` overall; otherwise the backend
/// reclaims the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTimeouts {
    pub heartbeat: Duration,
    pub schedule_to_start: Duration,
    pub schedule_to_close: Duration,
    pub start_to_close: Duration,
}

impl Default for TaskTimeouts {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            schedule_to_start: Duration::from_secs(30),
            schedule_to_close: Duration::from_secs(60 * 5),
            start_to_close: Duration::from_secs(60 * 5),
        }
    }
}

impl TaskTimeouts {
    /// Timeouts for medium-length tasks (larger downloads, XML generation).
    pub fn medium() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            schedule_to_start: Duration::from_secs(30),
            schedule_to_close: Duration::from_secs(60 * 15),
            start_to_close: Duration::from_secs(60 * 10),
        }
    }

    /// Timeouts for long-running deposit tasks.
    pub fn long() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            schedule_to_start: Duration::from_secs(30),
            schedule_to_close: Duration::from_secs(60 * 30),
            start_to_close: Duration::from_secs(60 * 15),
        }
    }
}

/// One step of a workflow: an activity invocation.
#[derive(Debug, Clone)]
pub struct WorkflowStep {
    /// Activity type name, resolved by the worker's registry.
    pub activity_type: String,

    /// Activity id, unique within the workflow.
    pub activity_id: String,

    /// Input payload handed to the activity.
    pub input: Value,

    pub timeouts: TaskTimeouts,

    pub retry: RetryPolicy,

    /// Opaque control data recorded with the schedule request.
    pub control: Option<Value>,
}

impl WorkflowStep {
    /// A step with default timeouts whose id equals its type.
    pub fn new(activity_type: impl Into<String>, input: Value) -> Self {
        let activity_type = activity_type.into();
        Self {
            activity_id: activity_type.clone(),
            activity_type,
            input,
            timeouts: TaskTimeouts::default(),
            retry: RetryPolicy::default(),
            control: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: TaskTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// An ordered step graph plus execution-level defaults.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub version: String,
    pub task_list: String,
    pub execution_timeout: Duration,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn first_step(&self) -> Option<&WorkflowStep> {
        self.steps.first()
    }

    pub fn step_index(&self, activity_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.activity_id == activity_id)
    }

    /// The step scheduled after the given activity id, if any.
    pub fn step_after(&self, activity_id: &str) -> Option<&WorkflowStep> {
        self.step_index(activity_id)
            .and_then(|index| self.steps.get(index + 1))
    }
}

/// Error from registry lookups.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),
}

/// Factory producing a definition for one execution's input.
pub type DefinitionFactory = Arc<dyn Fn(Value) -> WorkflowDefinition + Send + Sync>;

/// Registry of workflow definition factories, keyed by workflow type.
#[derive(Default)]
pub struct DefinitionRegistry {
    factories: HashMap<String, DefinitionFactory>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, workflow_type: impl Into<String>, factory: F)
    where
        F: Fn(Value) -> WorkflowDefinition + Send + Sync + 'static,
    {
        self.factories
            .insert(workflow_type.into(), Arc::new(factory));
    }

    pub fn contains(&self, workflow_type: &str) -> bool {
        self.factories.contains_key(workflow_type)
    }

    pub fn create(
        &self,
        workflow_type: &str,
        input: Value,
    ) -> Result<WorkflowDefinition, DefinitionError> {
        let factory = self
            .factories
            .get(workflow_type)
            .ok_or_else(|| DefinitionError::UnknownWorkflowType(workflow_type.to_string()))?;
        Ok(factory(input))
    }

    pub fn workflow_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }
}

impl std::fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("workflow_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_step_definition(input: Value) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "Sample".into(),
            version: "1".into(),
            task_list: "default".into(),
            execution_timeout: Duration::from_secs(60 * 30),
            steps: vec![
                WorkflowStep::new("Ping", input.clone()),
                WorkflowStep::new("Deposit", input).with_timeouts(TaskTimeouts::long()),
            ],
        }
    }

    #[test]
    fn step_navigation() {
        let definition = two_step_definition(json!({}));
        assert_eq!(definition.first_step().unwrap().activity_type, "Ping");
        assert_eq!(
            definition.step_after("Ping").unwrap().activity_type,
            "Deposit"
        );
        assert!(definition.step_after("Deposit").is_none());
        assert!(definition.step_after("Missing").is_none());
    }

    #[test]
    fn registry_creates_definitions() {
        let mut registry = DefinitionRegistry::new();
        registry.register("Sample", two_step_definition);

        assert!(registry.contains("Sample"));
        let definition = registry
            .create("Sample", json!({"run": "abc"}))
            .expect("definition created");
        assert_eq!(definition.steps.len(), 2);
        assert_eq!(definition.steps[0].input, json!({"run": "abc"}));
    }

    #[test]
    fn registry_rejects_unknown_types() {
        let registry = DefinitionRegistry::new();
        assert!(matches!(
            registry.create("Nope", json!({})),
            Err(DefinitionError::UnknownWorkflowType(_))
        ));
    }
}
