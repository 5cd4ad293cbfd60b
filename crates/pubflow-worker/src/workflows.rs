//! Workflow definitions this deployment registers.
//!
//! Step graphs are linear; each factory receives the execution input and
//! threads it into every step.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use pubflow_core::settings::Settings;
use pubflow_durable::workflow::{
    DefinitionRegistry, TaskTimeouts, WorkflowDefinition, WorkflowStep,
};

fn definition(
    name: &str,
    task_list: &str,
    execution_timeout: Duration,
    steps: Vec<WorkflowStep>,
) -> WorkflowDefinition {
    WorkflowDefinition {
        name: name.to_string(),
        version: "1".to_string(),
        task_list: task_list.to_string(),
        execution_timeout,
        steps,
    }
}

/// Register every workflow type the decider can drive.
pub fn register_all(registry: &mut DefinitionRegistry, settings: &Arc<Settings>) {
    let task_list = settings.default_task_list.clone();

    {
        let task_list = task_list.clone();
        registry.register("cron_FiveMinute", move |input: Value| {
            definition(
                "cron_FiveMinute",
                &task_list,
                Duration::from_secs(60 * 5),
                vec![WorkflowStep::new("Ping", input)],
            )
        });
    }

    {
        let task_list = task_list.clone();
        registry.register("DepositCrossref", move |input: Value| {
            definition(
                "DepositCrossref",
                &task_list,
                Duration::from_secs(60 * 30),
                vec![
                    WorkflowStep::new("Ping", input.clone()),
                    WorkflowStep::new("DepositCrossref", input)
                        .with_timeouts(TaskTimeouts::long()),
                ],
            )
        });
    }

    {
        let task_list = task_list.clone();
        registry.register("DepositCrossrefPeerReview", move |input: Value| {
            definition(
                "DepositCrossrefPeerReview",
                &task_list,
                Duration::from_secs(60 * 20),
                vec![
                    WorkflowStep::new("Ping", input.clone()),
                    WorkflowStep::new("DepositCrossrefPeerReview", input)
                        .with_timeouts(TaskTimeouts::long()),
                ],
            )
        });
    }

    {
        let task_list = task_list.clone();
        registry.register("PubmedArticleDeposit", move |input: Value| {
            definition(
                "PubmedArticleDeposit",
                &task_list,
                Duration::from_secs(60 * 30),
                vec![
                    WorkflowStep::new("Ping", input.clone()),
                    WorkflowStep::new("PubmedArticleDeposit", input)
                        .with_timeouts(TaskTimeouts::long()),
                ],
            )
        });
    }

    {
        let task_list = task_list.clone();
        registry.register("IngestDigest", move |input: Value| {
            definition(
                "IngestDigest",
                &task_list,
                Duration::from_secs(60 * 15),
                vec![
                    WorkflowStep::new("VersionLookup", input.clone())
                        .with_timeouts(TaskTimeouts::medium()),
                    WorkflowStep::new("IngestDigestToEndpoint", input)
                        .with_timeouts(TaskTimeouts::medium()),
                ],
            )
        });
    }

    {
        let task_list = task_list.clone();
        registry.register("AdminEmail", move |input: Value| {
            definition(
                "AdminEmail",
                &task_list,
                Duration::from_secs(60 * 10),
                vec![WorkflowStep::new("AdminEmail", input)],
            )
        });
    }
}
