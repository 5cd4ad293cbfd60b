//! The pubflow process entry point.
//!
//! One binary, one subcommand per process role: decider, activity worker,
//! S3 router, starter loop, cron, or everything at once for local
//! orchestration. The managed workflow backend is consumed through the
//! `WorkflowBackend` trait; this build wires the in-memory backend, which
//! makes `all` the deployment mode that actually advances workflows.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pubflow_core::monitor::{Monitor, NullSink, QueueSink};
use pubflow_core::queue::{InMemoryQueue, MessageQueue};
use pubflow_core::session::{FsSessionStore, SessionStore};
use pubflow_core::settings::Settings;
use pubflow_durable::activity::ActivityRegistry;
use pubflow_durable::backend::WorkflowBackend;
use pubflow_durable::memory::InMemoryBackend;
use pubflow_durable::scheduler::{CronScheduler, Schedule};
use pubflow_durable::starter::{StarterLoop, StarterRegistry};
use pubflow_durable::workflow::DefinitionRegistry;
use pubflow_durable::{Decider, RunFlag, Worker};
use pubflow_providers::crossref::CrossrefClient;
use pubflow_providers::digests::HttpDigestEndpoint;
use pubflow_providers::email::SmtpMailer;
use pubflow_providers::lax::HttpArticleVersions;
use pubflow_providers::pubmed::SftpTransport;
use pubflow_providers::sqs::SqsQueue;
use pubflow_providers::warehouse::{HttpWarehouse, ManuscriptSource, NullWarehouse};
use pubflow_storage::s3::S3ObjectStore;
use pubflow_storage::{InMemoryObjectStore, ObjectStore};
use pubflow_worker::activities::{self, Collaborators};
use pubflow_worker::router::{QueueWorker, RoutingRules};
use pubflow_worker::starters;
use pubflow_worker::workflows;
use pubflow_worker::{ROUTING_YAML, SCHEDULE_YAML};

#[derive(Parser)]
#[command(name = "pubflow", about = "Publication automation processes")]
struct Cli {
    /// Back storage and queues with in-memory fakes instead of AWS.
    #[arg(long)]
    local: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every process role in one process.
    All,
    /// Run the decision task loop.
    Decider,
    /// Run the activity task loop.
    Worker,
    /// Run the S3 notification router.
    Router,
    /// Run the workflow-start message loop.
    StarterLoop,
    /// Run the cron scheduler.
    Cron,
    /// Fire one starter by name.
    Start {
        starter: String,
        /// JSON payload handed to the starter.
        #[arg(long)]
        data: Option<String>,
    },
}

struct Processes {
    settings: Arc<Settings>,
    backend: Arc<dyn WorkflowBackend>,
    definitions: Arc<DefinitionRegistry>,
    activity_registry: Arc<ActivityRegistry>,
    starter_registry: Arc<StarterRegistry>,
    session_store: Arc<dyn SessionStore>,
    monitor: Monitor,
    notification_queue: Arc<dyn MessageQueue>,
    starter_queue: Arc<dyn MessageQueue>,
}

async fn build(settings: Arc<Settings>, local: bool) -> Result<Processes> {
    let store: Arc<dyn ObjectStore> = if local {
        Arc::new(InMemoryObjectStore::new())
    } else {
        Arc::new(S3ObjectStore::new(settings.region.clone()))
    };

    let notification_queue: Arc<dyn MessageQueue> = if local {
        Arc::new(InMemoryQueue::new())
    } else {
        Arc::new(SqsQueue::connect(&settings.s3_notification_queue).await?)
    };
    let starter_queue: Arc<dyn MessageQueue> = if local {
        Arc::new(InMemoryQueue::new())
    } else {
        Arc::new(SqsQueue::connect(&settings.workflow_starter_queue).await?)
    };
    let monitor = if local {
        Monitor::new(Arc::new(NullSink))
    } else {
        let monitor_queue: Arc<dyn MessageQueue> =
            Arc::new(SqsQueue::connect(&settings.monitor_queue).await?);
        Monitor::new(Arc::new(QueueSink::new(monitor_queue)))
    };

    let warehouse: Arc<dyn ManuscriptSource> = if settings.warehouse_url.is_empty() {
        Arc::new(NullWarehouse)
    } else {
        Arc::new(HttpWarehouse::new(
            settings.warehouse_url.clone(),
            settings.warehouse_token.clone(),
        ))
    };

    let collaborators = Collaborators {
        settings: settings.clone(),
        store,
        lax: Arc::new(HttpArticleVersions::new(
            settings.lax_article_versions_url.clone(),
        )),
        crossref: Arc::new(CrossrefClient::new(
            settings.crossref_url.clone(),
            settings.crossref_login_id.clone(),
            settings.crossref_login_passwd.clone(),
        )),
        transport: Arc::new(SftpTransport::new(settings.sftp.clone())),
        mailer: Arc::new(SmtpMailer::from_settings(&settings.smtp)?),
        warehouse,
        digests: Arc::new(HttpDigestEndpoint::new(settings.digest_endpoint_url.clone())),
    };

    let mut activity_registry = ActivityRegistry::new();
    activities::register_all(&mut activity_registry, &collaborators);

    let mut definitions = DefinitionRegistry::new();
    workflows::register_all(&mut definitions, &settings);

    let mut starter_registry = StarterRegistry::new();
    starters::register_all(&mut starter_registry, &settings);

    Ok(Processes {
        backend: Arc::new(InMemoryBackend::new()),
        definitions: Arc::new(definitions),
        activity_registry: Arc::new(activity_registry),
        starter_registry: Arc::new(starter_registry),
        session_store: Arc::new(FsSessionStore::new(settings.session_dir.clone())),
        monitor,
        notification_queue,
        starter_queue,
        settings,
    })
}

impl Processes {
    fn decider(&self) -> Decider {
        Decider::new(
            self.backend.clone(),
            self.definitions.clone(),
            self.settings.default_task_list.clone(),
            format!("decider_{}", std::process::id()),
        )
    }

    fn worker(&self) -> Worker {
        Worker::new(
            self.backend.clone(),
            self.activity_registry.clone(),
            self.session_store.clone(),
            self.monitor.clone(),
            self.settings.default_task_list.clone(),
            format!("worker_{}", std::process::id()),
        )
    }

    fn router(&self) -> Result<QueueWorker> {
        let rules = RoutingRules::from_yaml(ROUTING_YAML)?;
        Ok(QueueWorker::new(
            self.notification_queue.clone(),
            self.starter_queue.clone(),
            rules,
        ))
    }

    fn starter_loop(&self) -> StarterLoop {
        StarterLoop::new(
            self.starter_queue.clone(),
            self.starter_registry.clone(),
            self.backend.clone(),
        )
    }

    fn cron(&self) -> Result<CronScheduler> {
        let schedule = Schedule::from_yaml(SCHEDULE_YAML)?;
        Ok(CronScheduler::new(
            self.backend.clone(),
            self.starter_registry.clone(),
            schedule,
            &self.settings.local_timezone,
        )?)
    }
}

/// Lower the flag on ctrl-c so every loop exits cleanly.
fn watch_for_shutdown(flag: RunFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("termination signal received, lowering the run flag");
            flag.lower();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pubflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env().into_shared();
    tracing::info!(environment = %settings.environment, "pubflow starting");

    let processes = build(settings, cli.local).await?;
    let flag = RunFlag::new();
    watch_for_shutdown(flag.clone());

    match cli.command {
        Command::All => {
            let decider = processes.decider();
            let worker = processes.worker();
            let router = processes.router()?;
            let starter_loop = processes.starter_loop();
            let cron = processes.cron()?;
            tokio::join!(
                decider.run(flag.clone()),
                worker.run(flag.clone()),
                router.run(flag.clone()),
                starter_loop.run(flag.clone()),
                cron.run(flag.clone()),
            );
        }
        Command::Decider => processes.decider().run(flag).await,
        Command::Worker => processes.worker().run(flag).await,
        Command::Router => processes.router()?.run(flag).await,
        Command::StarterLoop => processes.starter_loop().run(flag).await,
        Command::Cron => processes.cron()?.run(flag).await,
        Command::Start { starter, data } => {
            let payload: Value = match data {
                Some(data) => serde_json::from_str(&data)?,
                None => Value::Object(Default::default()),
            };
            let Some(starter) = processes.starter_registry.get(&starter) else {
                anyhow::bail!("no starter registered with name {starter}");
            };
            starter.start(&processes.backend, payload).await?;
        }
    }

    Ok(())
}
