use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use anyhow::Result;
use diesel::prelude::*;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use torale_core::clock::SystemClock;
use torale_core::config::Config;
use torale_core::notifier::{LoggingNotifier, Notifier, WebhookNotifier};
use torale_core::store::PgTaskStore;
use torale_core::task_service::TaskService;
use torale_core::task_workflow::TaskWorkflow;
use torale_core::workflow_runtime::{InProcessWorkflowRuntime, SchedulesDb, WorkflowRuntime};
use torale_core::CoreResult;

/// `TaskWorkflow` needs a `WorkflowRuntime` for `PauseSchedule`, and
/// `InProcessWorkflowRuntime` needs a `WorkflowRunner` (`TaskWorkflow`) to
/// dispatch onto — neither can be built first. This handle is constructed
/// empty, handed to `TaskWorkflow`, and filled in once the real runtime
/// exists, right after construction and before either side runs.
#[derive(Default)]
struct RuntimeHandle(OnceLock<Arc<dyn WorkflowRuntime>>);

impl RuntimeHandle {
    fn inner(&self) -> &Arc<dyn WorkflowRuntime> {
        self.0.get().expect("RuntimeHandle used before wiring completed")
    }
}

#[async_trait::async_trait]
impl WorkflowRuntime for RuntimeHandle {
    async fn register_schedule(&self, task_id: Uuid, cron_expr: &str) -> CoreResult<()> {
        self.inner().register_schedule(task_id, cron_expr).await
    }
    async fn pause(&self, task_id: Uuid) -> CoreResult<()> {
        self.inner().pause(task_id).await
    }
    async fn resume(&self, task_id: Uuid) -> CoreResult<()> {
        self.inner().resume(task_id).await
    }
    async fn unregister(&self, task_id: Uuid) -> CoreResult<()> {
        self.inner().unregister(task_id).await
    }
    async fn run_now(&self, task_id: Uuid, suppress_notifications: bool) -> CoreResult<Uuid> {
        self.inner().run_now(task_id, suppress_notifications).await
    }
    async fn is_paused(&self, task_id: Uuid) -> CoreResult<Option<bool>> {
        self.inner().is_paused(task_id).await
    }
}

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "torale=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Torale starting up...");

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    {
        let mut conn = diesel::PgConnection::establish(&config.database_url)?;
        conn.run_pending_migrations(&MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
        info!("database migrations applied");
    }

    if config.brave_api_key.is_none() {
        warn!("BRAVE_API_KEY not set - grounded search will be unavailable");
    }

    let store = Arc::new(PgTaskStore::connect(&config.database_url)?);
    let shared_conn = Arc::new(StdMutex::new(diesel::PgConnection::establish(
        &config.database_url,
    )?));
    let schedules = Arc::new(SchedulesDb::from_connection(shared_conn));
    let clock = Arc::new(SystemClock);

    let search = torale_search::build_grounded_search(&config)?;

    let notifier: Arc<dyn Notifier> = match &config.notifier_webhook_url {
        Some(url) => {
            info!("notifier: webhook ({url})");
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => {
            info!("notifier: logging (no NOTIFIER_WEBHOOK_URL set)");
            Arc::new(LoggingNotifier)
        }
    };

    let runtime_handle: Arc<RuntimeHandle> = Arc::default();
    let workflow = Arc::new(TaskWorkflow {
        store: store.clone(),
        search,
        notifier,
        runtime: runtime_handle.clone() as Arc<dyn WorkflowRuntime>,
        clock: clock.clone(),
        canonical_hash_enabled: config.executor_canonical_state_hash,
        timeouts: config.workflow_activity_timeouts.clone(),
        notifier_default_channel: config.notifier_default_channel.clone(),
    });

    let workflow_runtime = InProcessWorkflowRuntime::new(
        schedules,
        workflow.clone(),
        std::time::Duration::from_secs(config.scheduler_poll_interval_secs),
    );
    runtime_handle
        .0
        .set(workflow_runtime.clone() as Arc<dyn WorkflowRuntime>)
        .map_err(|_| anyhow::anyhow!("runtime handle already wired"))?;
    let _poll_handle = workflow_runtime.spawn();
    info!(
        "workflow runtime polling every {}s",
        config.scheduler_poll_interval_secs
    );

    let task_service = Arc::new(TaskService::new(
        store,
        workflow_runtime,
        clock,
        &config,
    ));

    let app = torale_core::http::router(task_service)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.http_port);
    info!("HTTP server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
