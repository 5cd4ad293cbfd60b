//! The pubflow worker deployment.
//!
//! Everything the `pubflow` binary wires together: the activities, the
//! workflow definitions, the starters, the S3 router, and the YAML
//! resources for the cron schedule and routing rules.

pub mod activities;
pub mod article;
pub mod deposit;
pub mod router;
pub mod starters;
pub mod workflows;

/// Cron schedule table (see `pubflow_durable::scheduler::Schedule`).
pub const SCHEDULE_YAML: &str = include_str!("../resources/schedule.yaml");

/// S3 routing rules (see `router::RoutingRules`).
pub const ROUTING_YAML: &str = include_str!("../resources/routing.yaml");
