//! End-to-end tests over the in-memory backend: router to starter to
//! decider to worker to the external fakes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use pubflow_core::monitor::Monitor;
use pubflow_core::queue::{InMemoryQueue, MessageQueue};
use pubflow_core::session::InMemorySessionStore;
use pubflow_core::settings::Settings;
use pubflow_durable::activity::ActivityRegistry;
use pubflow_durable::backend::WorkflowBackend;
use pubflow_durable::memory::{ExecutionStatus, InMemoryBackend};
use pubflow_durable::scheduler::{CronScheduler, Schedule};
use pubflow_durable::starter::{StarterLoop, StarterRegistry};
use pubflow_durable::workflow::DefinitionRegistry;
use pubflow_durable::{Decider, RunFlag, Worker};
use pubflow_providers::crossref::MemoryDepositEndpoint;
use pubflow_providers::digests::MemoryDigestEndpoint;
use pubflow_providers::email::MemoryMailer;
use pubflow_providers::lax::{FixedArticleVersions, VersionsResult};
use pubflow_providers::pubmed::MemoryTransport;
use pubflow_providers::warehouse::NullWarehouse;
use pubflow_storage::InMemoryObjectStore;
use pubflow_worker::activities::{self, Collaborators};
use pubflow_worker::router::{QueueWorker, RoutingRules};
use pubflow_worker::{starters, workflows, ROUTING_YAML, SCHEDULE_YAML};

const ARTICLE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<article>
  <front>
    <article-meta>
      <article-id pub-id-type="publisher-id">29353</article-id>
      <article-id pub-id-type="doi">10.7554/eLife.29353</article-id>
      <title-group><article-title>Replication Study</article-title></title-group>
      <pub-date date-type="pub"><day>12</day><month>12</month><year>2017</year></pub-date>
    </article-meta>
  </front>
</article>"#;

struct Harness {
    settings: Arc<Settings>,
    backend: Arc<InMemoryBackend>,
    store: Arc<InMemoryObjectStore>,
    mailer: Arc<MemoryMailer>,
    crossref: Arc<MemoryDepositEndpoint>,
    decider: Arc<Decider>,
    worker: Arc<Worker>,
    starter_registry: Arc<StarterRegistry>,
}

fn harness() -> Harness {
    let settings = Arc::new(Settings::default());
    let backend = Arc::new(InMemoryBackend::new());
    let store = Arc::new(InMemoryObjectStore::new());
    let mailer = Arc::new(MemoryMailer::new());
    let crossref = Arc::new(MemoryDepositEndpoint::accepting());

    let collaborators = Collaborators {
        settings: settings.clone(),
        store: store.clone(),
        lax: Arc::new(FixedArticleVersions::new(VersionsResult::NoVersions)),
        crossref: crossref.clone(),
        transport: Arc::new(MemoryTransport::accepting()),
        mailer: mailer.clone(),
        warehouse: Arc::new(NullWarehouse),
        digests: Arc::new(MemoryDigestEndpoint::new()),
    };

    let mut activity_registry = ActivityRegistry::new();
    activities::register_all(&mut activity_registry, &collaborators);

    let mut definitions = DefinitionRegistry::new();
    workflows::register_all(&mut definitions, &settings);

    let mut starter_registry = StarterRegistry::new();
    starters::register_all(&mut starter_registry, &settings);

    let decider = Arc::new(
        Decider::new(
            backend.clone() as Arc<dyn WorkflowBackend>,
            Arc::new(definitions),
            settings.default_task_list.clone(),
            "decider_test",
        )
        .with_poll_wait(Duration::from_millis(20)),
    );
    let worker = Arc::new(
        Worker::new(
            backend.clone() as Arc<dyn WorkflowBackend>,
            Arc::new(activity_registry),
            Arc::new(InMemorySessionStore::new()),
            Monitor::null(),
            settings.default_task_list.clone(),
            "worker_test",
        )
        .with_poll_wait(Duration::from_millis(20)),
    );

    Harness {
        settings,
        backend,
        store,
        mailer,
        crossref,
        decider,
        worker,
        starter_registry: Arc::new(starter_registry),
    }
}

fn spawn_loops(harness: &Harness, flag: &RunFlag) {
    let decider = harness.decider.clone();
    let decider_flag = flag.clone();
    tokio::spawn(async move { decider.run(decider_flag).await });

    let worker = harness.worker.clone();
    let worker_flag = flag.clone();
    tokio::spawn(async move { worker.run(worker_flag).await });
}

async fn wait_for_completion(backend: &InMemoryBackend, workflow_id: &str) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(run) = backend.run_for(workflow_id) {
                if backend.execution_status(&run) == Some(ExecutionStatus::Completed) {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("workflow completes in time")
}

#[tokio::test]
async fn crossref_deposit_workflow_runs_to_completion() {
    let harness = harness();
    harness.store.seed(
        "pubflow-packaging",
        "crossref/outbox/elife-29353-v1.xml",
        ARTICLE_XML,
    );

    let flag = RunFlag::new();
    spawn_loops(&harness, &flag);

    let backend: Arc<dyn WorkflowBackend> = harness.backend.clone();
    harness
        .starter_registry
        .get("DepositCrossref")
        .unwrap()
        .start(&backend, json!({}))
        .await
        .unwrap();

    let run = wait_for_completion(&harness.backend, "DepositCrossref").await;
    flag.lower();

    // Step ordering equals the workflow definition prefix.
    assert_eq!(
        harness.backend.scheduled_activity_types(&run),
        vec!["Ping", "DepositCrossref"]
    );

    // The deposit reached the endpoint and the outbox was archived.
    assert_eq!(harness.crossref.deposited(), vec!["crossref-29353.xml"]);
    let keys = harness.store.keys("pubflow-packaging");
    assert!(keys
        .iter()
        .all(|key| !key.starts_with("crossref/outbox/")));
    assert!(keys
        .iter()
        .any(|key| key.contains("/batch/crossref-29353.xml")));

    // One admin email.
    assert_eq!(harness.mailer.sent().len(), 1);
    assert!(harness.mailer.sent()[0].subject.contains("files: 1"));
}

#[tokio::test]
async fn routed_s3_event_starts_a_deduplicated_workflow() {
    let harness = harness();
    let notification_queue = Arc::new(InMemoryQueue::new());
    let starter_queue = Arc::new(InMemoryQueue::new());

    let router = Arc::new(
        QueueWorker::new(
            notification_queue.clone(),
            starter_queue.clone(),
            RoutingRules::from_yaml(ROUTING_YAML).unwrap(),
        )
        .with_poll_wait(Duration::from_millis(20)),
    );
    let starter_loop = Arc::new(
        StarterLoop::new(
            starter_queue.clone(),
            harness.starter_registry.clone(),
            harness.backend.clone() as Arc<dyn WorkflowBackend>,
        )
        .with_poll_wait(Duration::from_millis(20)),
    );

    let flag = RunFlag::new();
    {
        let router = router.clone();
        let router_flag = flag.clone();
        tokio::spawn(async move { router.run(router_flag).await });
    }
    {
        let starter_loop = starter_loop.clone();
        let starter_flag = flag.clone();
        tokio::spawn(async move { starter_loop.run(starter_flag).await });
    }

    let event = json!({
        "Records": [{
            "eventTime": "2017-12-12T09:30:00.000Z",
            "s3": {
                "bucket": { "name": "prod-articles" },
                "object": { "key": "elife-00353-vor-v1.zip" }
            }
        }]
    })
    .to_string();
    notification_queue.send(event.clone()).await.unwrap();

    // The routed start produces an execution with the file-derived id.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if harness
                .backend
                .run_for("IngestDigest_elife-00353-vor-v1")
                .is_some()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("routed workflow started");

    // A duplicate of the same event deduplicates at the backend while the
    // first execution is open.
    notification_queue.send(event).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    flag.lower();

    assert_eq!(harness.backend.open_execution_count(), 1);
}

#[tokio::test]
async fn cron_gate_skips_recent_completions() {
    let harness = harness();
    let schedule = Schedule::from_yaml(SCHEDULE_YAML).unwrap();
    let cron = CronScheduler::new(
        harness.backend.clone() as Arc<dyn WorkflowBackend>,
        harness.starter_registry.clone(),
        schedule,
        &harness.settings.local_timezone,
    )
    .unwrap();

    // cron_FiveMinute completed 120 seconds ago; its gate is 180 seconds.
    let now = chrono::Utc::now();
    harness
        .backend
        .set_last_completed("cron_FiveMinute", now - chrono::Duration::seconds(120));

    // Tick at minute :05 of a quiet hour (02:05 UTC keeps every
    // hour-gated row out of the way, and 02:05 London is never 11 or 12).
    let tick_at = now
        .date_naive()
        .and_hms_opt(2, 5, 0)
        .unwrap()
        .and_utc();
    harness
        .backend
        .set_last_completed("DepositCrossref", tick_at - chrono::Duration::seconds(60));
    cron.tick(tick_at).await;

    assert_eq!(harness.backend.open_execution_count(), 0);

    // Move the completion past the gate and the start goes through.
    harness
        .backend
        .set_last_completed("cron_FiveMinute", tick_at - chrono::Duration::seconds(200));
    cron.tick(tick_at).await;

    assert!(harness.backend.run_for("cron_FiveMinute").is_some());
    assert_eq!(harness.backend.open_execution_count(), 1);
}

#[tokio::test]
async fn unknown_workflow_type_fails_only_that_execution() {
    let harness = harness();
    let flag = RunFlag::new();
    spawn_loops(&harness, &flag);

    let backend: Arc<dyn WorkflowBackend> = harness.backend.clone();
    let run = backend
        .start_workflow_execution(pubflow_durable::backend::StartRequest::new(
            "Mystery",
            "MysteryWorkflow",
            json!({}),
        ))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if harness.backend.execution_status(&run) == Some(ExecutionStatus::Failed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("unknown workflow type fails");

    // The decider keeps going: a known workflow still completes.
    harness
        .starter_registry
        .get("FiveMinute")
        .unwrap()
        .start(&backend, json!({}))
        .await
        .unwrap();
    wait_for_completion(&harness.backend, "cron_FiveMinute").await;
    flag.lower();
}

#[tokio::test]
async fn ingest_workflow_passes_session_values_between_steps() {
    let harness = harness();
    let flag = RunFlag::new();
    spawn_loops(&harness, &flag);

    let backend: Arc<dyn WorkflowBackend> = harness.backend.clone();
    harness
        .starter_registry
        .get("IngestArticleZip")
        .unwrap()
        .start(
            &backend,
            json!({
                "bucket": "prod-articles",
                "key": "elife-00353-vor-v1.zip",
                "run": "0192d7a0-2222-7000-8000-000000000000",
            }),
        )
        .await
        .unwrap();

    let run = wait_for_completion(&harness.backend, "IngestDigest_elife-00353-vor-v1").await;
    flag.lower();

    // VersionLookup ran first and IngestDigestToEndpoint consumed what it
    // stored; with no digest source seeded the ingest ends as a no-op.
    assert_eq!(
        harness.backend.scheduled_activity_types(&run),
        vec!["VersionLookup", "IngestDigestToEndpoint"]
    );
}
