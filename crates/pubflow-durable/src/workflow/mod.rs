//! Workflow definitions and history.

mod definition;
mod history;

pub use definition::{
    DefinitionError, DefinitionRegistry, TaskTimeouts, WorkflowDefinition, WorkflowStep,
};
pub use history::{ActivityTask, DecisionTask, FailureKind, HistoryEvent, HistoryPage};
