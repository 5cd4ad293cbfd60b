//! Starters this deployment registers.
//!
//! Singleton starters use the workflow name (or the cron-supplied variant
//! id) as the workflow id; file-triggered starters derive the id from the
//! incoming file name so a duplicated S3 event deduplicates at the backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use pubflow_core::identity::file_name_from_key;
use pubflow_core::settings::Settings;
use pubflow_durable::backend::{StartRequest, WorkflowBackend};
use pubflow_durable::starter::{
    file_workflow_id, start_execution, Starter, StarterError, StarterRegistry,
};

/// Starter for singleton workflows: one execution at a time, id equal to
/// the workflow name (or the variant id the cron table supplies).
pub struct SingletonStarter {
    name: &'static str,
    workflow_type: &'static str,
    task_list: String,
}

impl SingletonStarter {
    pub fn new(name: &'static str, workflow_type: &'static str, task_list: String) -> Self {
        Self {
            name,
            workflow_type,
            task_list,
        }
    }
}

#[async_trait]
impl Starter for SingletonStarter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(
        &self,
        backend: &Arc<dyn WorkflowBackend>,
        data: Value,
    ) -> Result<(), StarterError> {
        let workflow_id = data
            .get("workflow_id")
            .and_then(Value::as_str)
            .unwrap_or(self.workflow_type)
            .to_string();

        let request = StartRequest::new(workflow_id, self.workflow_type, data)
            .with_task_list(self.task_list.clone());
        start_execution(backend, request).await
    }
}

/// Starter for file-triggered workflows.
pub struct FileStarter {
    name: &'static str,
    workflow_type: &'static str,
    task_list: String,
    /// Append the trigger's run to the workflow id, for re-ingests that
    /// must not deduplicate against an earlier delivery of the same file.
    run_suffix: bool,
    /// Extra fields merged into the workflow input.
    input_extras: Value,
}

impl FileStarter {
    pub fn new(
        name: &'static str,
        workflow_type: &'static str,
        task_list: String,
        run_suffix: bool,
        input_extras: Value,
    ) -> Self {
        Self {
            name,
            workflow_type,
            task_list,
            run_suffix,
            input_extras,
        }
    }
}

#[async_trait]
impl Starter for FileStarter {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(
        &self,
        backend: &Arc<dyn WorkflowBackend>,
        data: Value,
    ) -> Result<(), StarterError> {
        let key = data
            .get("key")
            .or_else(|| data.get("file_name"))
            .and_then(Value::as_str)
            .ok_or(StarterError::MissingField("key"))?;
        let file_name = file_name_from_key(key).to_string();

        let run = data
            .get("run")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

        let workflow_id = file_workflow_id(
            self.workflow_type,
            &file_name,
            self.run_suffix.then_some(run.as_str()),
        );

        let mut input = data.clone();
        if let Value::Object(object) = &mut input {
            object.insert("run".to_string(), json!(run));
            object
                .entry("file_name".to_string())
                .or_insert_with(|| json!(file_name));
            if let Value::Object(extras) = &self.input_extras {
                for (key, value) in extras {
                    object.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }

        let request = StartRequest::new(workflow_id, self.workflow_type, input)
            .with_task_list(self.task_list.clone());
        start_execution(backend, request).await
    }
}

/// Register every starter the router and cron can address.
pub fn register_all(registry: &mut StarterRegistry, settings: &Arc<Settings>) {
    let task_list = settings.default_task_list.clone();

    registry.register(SingletonStarter::new(
        "FiveMinute",
        "cron_FiveMinute",
        task_list.clone(),
    ));
    registry.register(SingletonStarter::new(
        "DepositCrossref",
        "DepositCrossref",
        task_list.clone(),
    ));
    registry.register(SingletonStarter::new(
        "DepositCrossrefPeerReview",
        "DepositCrossrefPeerReview",
        task_list.clone(),
    ));
    registry.register(SingletonStarter::new(
        "PubmedArticleDeposit",
        "PubmedArticleDeposit",
        task_list.clone(),
    ));
    registry.register(SingletonStarter::new(
        "AdminEmail",
        "AdminEmail",
        task_list.clone(),
    ));
    registry.register(FileStarter::new(
        "IngestArticleZip",
        "IngestDigest",
        task_list.clone(),
        false,
        json!({ "version_lookup_function": "article_next_version" }),
    ));
    registry.register(FileStarter::new(
        "SilentCorrectionsIngest",
        "IngestDigest",
        task_list,
        true,
        json!({
            "run_type": "silent-correction",
            "version_lookup_function": "article_highest_version",
        }),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubflow_durable::memory::InMemoryBackend;

    fn backend() -> (Arc<InMemoryBackend>, Arc<dyn WorkflowBackend>) {
        let concrete = Arc::new(InMemoryBackend::new());
        let erased: Arc<dyn WorkflowBackend> = concrete.clone();
        (concrete, erased)
    }

    #[tokio::test]
    async fn singleton_starter_uses_the_workflow_name() {
        let (concrete, erased) = backend();
        let starter = SingletonStarter::new("AdminEmail", "AdminEmail", "default".into());

        starter.start(&erased, json!({})).await.unwrap();
        assert!(concrete.run_for("AdminEmail").is_some());

        // A second start while the first is open is swallowed.
        starter.start(&erased, json!({})).await.unwrap();
        assert_eq!(concrete.open_execution_count(), 1);
    }

    #[tokio::test]
    async fn singleton_starter_honors_cron_variant_ids() {
        let (concrete, erased) = backend();
        let starter =
            SingletonStarter::new("DepositCrossref", "DepositCrossref", "default".into());

        starter
            .start(&erased, json!({ "workflow_id": "DepositCrossref" }))
            .await
            .unwrap();
        assert!(concrete.run_for("DepositCrossref").is_some());
    }

    #[tokio::test]
    async fn file_starter_derives_the_workflow_id_from_the_file() {
        let (concrete, erased) = backend();
        let starter = FileStarter::new(
            "IngestArticleZip",
            "IngestDigest",
            "default".into(),
            false,
            json!({}),
        );

        starter
            .start(
                &erased,
                json!({
                    "bucket": "elife-articles",
                    "key": "inbox/elife-00353-vor-v1.zip",
                    "run": "0192d7a0-1111-7000-8000-000000000000",
                }),
            )
            .await
            .unwrap();

        assert!(concrete
            .run_for("IngestDigest_elife-00353-vor-v1")
            .is_some());
    }

    #[tokio::test]
    async fn file_starter_merges_extras_into_the_input() {
        let (concrete, erased) = backend();
        let starter = FileStarter::new(
            "SilentCorrectionsIngest",
            "IngestDigest",
            "default".into(),
            true,
            json!({ "run_type": "silent-correction" }),
        );

        starter
            .start(
                &erased,
                json!({ "key": "elife-00353-vor-v2.zip", "run": "run-a" }),
            )
            .await
            .unwrap();

        let run = concrete
            .run_for("IngestDigest_elife-00353-vor-v2.run-a")
            .expect("run-suffixed workflow id");
        let history = concrete.history(&run);
        match &history[0] {
            pubflow_durable::workflow::HistoryEvent::WorkflowExecutionStarted { input } => {
                assert_eq!(input["run_type"], "silent-correction");
                assert_eq!(input["file_name"], "elife-00353-vor-v2.zip");
                assert_eq!(input["run"], "run-a");
            }
            other => panic!("unexpected first event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn file_starter_requires_a_key() {
        let (_, erased) = backend();
        let starter = FileStarter::new(
            "IngestArticleZip",
            "IngestDigest",
            "default".into(),
            false,
            json!({}),
        );
        let result = starter.start(&erased, json!({})).await;
        assert!(matches!(result, Err(StarterError::MissingField("key"))));
    }

    #[test]
    fn register_all_covers_router_and_cron_names() {
        let mut registry = StarterRegistry::new();
        register_all(&mut registry, &Arc::new(Settings::default()));
        for name in [
            "FiveMinute",
            "DepositCrossref",
            "DepositCrossrefPeerReview",
            "PubmedArticleDeposit",
            "AdminEmail",
            "IngestArticleZip",
            "SilentCorrectionsIngest",
        ] {
            assert!(registry.contains(name), "missing starter {name}");
        }
    }
}
