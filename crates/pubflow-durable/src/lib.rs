//! # Workflow orchestration substrate
//!
//! Drives declarative workflow graphs forward on a long-poll task backend:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Decider                             │
//! │  (polls decision tasks, folds history, schedules next step) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkflowBackend                         │
//! │  (task lists, decision/activity tasks, history, timers)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Worker                              │
//! │  (claims activity tasks, runs activities, reports outcomes) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Starters create executions with stable, content-derived workflow ids so
//! duplicate triggers deduplicate at the backend; the cron scheduler emits
//! the same start requests on a time schedule with a minimum-interval guard.

pub mod activity;
pub mod backend;
pub mod decider;
pub mod flag;
pub mod memory;
pub mod retry;
pub mod scheduler;
pub mod starter;
pub mod worker;
pub mod workflow;

pub use activity::{Activity, ActivityContext, ActivityRegistry, Outcome};
pub use backend::{StartError, StartRequest, WorkflowBackend};
pub use decider::Decider;
pub use flag::RunFlag;
pub use memory::InMemoryBackend;
pub use retry::RetryPolicy;
pub use scheduler::{ConditionalStart, CronScheduler, Schedule};
pub use starter::{Starter, StarterLoop, StarterRegistry, StartMessage};
pub use worker::Worker;
pub use workflow::{
    DefinitionRegistry, TaskTimeouts, WorkflowDefinition, WorkflowStep,
};
