mod config;
mod health;

use std::sync::Arc;

use anyhow::Context;
use coordinator_bus::WorkflowBus;
use coordinator_engine::{
    JobDispatcher, JobDispatcherConfig, ManifestManager, ManifestManagerConfig, MetadataCleanup,
    MetadataCleanupConfig, StartupService, StartupServiceConfig, TaskServerExecutor,
    TaskServerExecutorConfig,
};
use coordinator_store::PostgresStore;
use coordinator_taskserver::{handler_fn, PostgresTaskServer, WorkerPool, WorkerPoolConfig};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config::resolve_log_filter()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("coordinator-service starting...");

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = sqlx::PgPool::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    tracing::info!("connected to database");

    let store = Arc::new(PostgresStore::new(pool.clone()));
    let task_server = Arc::new(PostgresTaskServer::new(pool.clone()));

    // User workflows register here at boot, e.g. `bus.register(MyWorkflow)?`.
    let bus = WorkflowBus::new();

    let startup = StartupService::new(store.clone(), StartupServiceConfig::default());
    startup
        .run(Vec::new())
        .await
        .context("startup recovery failed")?;
    tracing::info!("startup recovery complete");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let manifest_manager = ManifestManager::new(
        store.clone(),
        ManifestManagerConfig {
            polling_interval: config.poll_interval,
        },
    );
    let manifest_manager_handle = tokio::spawn(manifest_manager.run(shutdown_rx.clone()));

    let job_dispatcher = JobDispatcher::new(
        store.clone(),
        task_server.clone(),
        JobDispatcherConfig {
            polling_interval: config.poll_interval,
            global_cap: config.dispatch_global_cap,
            ..JobDispatcherConfig::default()
        },
    );
    let job_dispatcher_handle = tokio::spawn(job_dispatcher.run(shutdown_rx.clone()));

    let metadata_cleanup = MetadataCleanup::new(
        store.clone(),
        MetadataCleanupConfig {
            cleanup_interval: config.metadata_cleanup_interval,
            retention: config.metadata_retention,
            ..MetadataCleanupConfig::default()
        },
    );
    let metadata_cleanup_handle = tokio::spawn(metadata_cleanup.run(shutdown_rx.clone()));

    let executor = Arc::new(TaskServerExecutor::new(
        store.clone(),
        bus,
        TaskServerExecutorConfig::default(),
    ));
    let worker_pool = WorkerPool::spawn(
        task_server.clone(),
        WorkerPoolConfig {
            worker_count: config.worker_count.unwrap_or_else(|| {
                std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
            }),
            polling_interval: config.poll_interval,
            visibility_timeout: config.visibility_timeout,
            shutdown_timeout: config.shutdown_timeout,
        },
        handler_fn(move |payload| {
            let executor = executor.clone();
            async move { executor.execute(payload).await }
        }),
    );

    let app = health::routes();
    let addr = "0.0.0.0:9100";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind health endpoint")?;
    tracing::info!("health endpoint listening on {addr}");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("health server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    worker_pool.shutdown().await;
    let _ = tokio::time::timeout(config.shutdown_timeout, async {
        let _ = manifest_manager_handle.await;
        let _ = job_dispatcher_handle.await;
        let _ = metadata_cleanup_handle.await;
    })
    .await;

    tracing::info!("coordinator-service stopped");
    Ok(())
}
