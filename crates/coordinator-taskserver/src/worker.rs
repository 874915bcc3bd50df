//! The task server's worker pool: N workers (default = host CPU count)
//! each polling `TaskServer::claim`, sleeping `polling_interval` on an
//! empty claim, and invoking a handler closure synchronously on a hit.
//! Shutdown is cooperative: a `watch::Receiver<bool>` broadcast tells
//! workers to stop claiming new jobs; the in-flight job is given
//! `shutdown_timeout` to finish before the pool returns anyway.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::TaskServer;

/// A claimed job's payload, handed to the registered handler.
pub type JobHandler =
    Arc<dyn Fn(serde_json::Value) -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub polling_interval: Duration,
    pub visibility_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus(),
            polling_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(30 * 60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Spawns and owns the worker tasks. Consuming `shutdown()` signals all
/// workers to stop claiming, then waits up to `shutdown_timeout` for
/// in-flight jobs to finish before returning regardless.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    pub fn spawn<T: TaskServer>(
        task_server: Arc<T>,
        config: WorkerPoolConfig,
        handler: JobHandler,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(config.worker_count);

        for worker_id in 0..config.worker_count {
            let task_server = task_server.clone();
            let handler = handler.clone();
            let config = config.clone();
            let mut shutdown_rx = shutdown_rx.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, task_server, config, handler, &mut shutdown_rx).await;
            }));
        }

        Self {
            handles,
            shutdown_tx,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let join_all = futures::future::join_all(self.handles);
        match tokio::time::timeout(self.shutdown_timeout, join_all).await {
            Ok(_) => info!("task server worker pool shut down cleanly"),
            Err(_) => warn!(
                "task server worker pool did not shut down within {:?}; abandoning in-flight jobs",
                self.shutdown_timeout
            ),
        }
    }
}

async fn worker_loop<T: TaskServer>(
    worker_id: usize,
    task_server: Arc<T>,
    config: WorkerPoolConfig,
    handler: JobHandler,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            debug!(worker_id, "shutdown signal received, stopping claims");
            return;
        }

        match task_server.claim(config.visibility_timeout).await {
            Ok(Some(job)) => {
                handler(job.payload.clone()).await;
                if let Err(e) = task_server.complete(job.id).await {
                    warn!(worker_id, job_id = %job.id, "failed to complete job: {e}");
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(config.polling_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
            Err(e) => {
                warn!(worker_id, "claim failed: {e}");
                tokio::time::sleep(config.polling_interval).await;
            }
        }
    }
}

/// Convenience wrapper so callers needn't depend on `futures` directly to
/// build a [`JobHandler`].
pub fn handler_fn<F, Fut>(f: F) -> JobHandler
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}
