//! JobDispatcher: runs the admission algorithm (§4.3) over `Queued`
//! work-queue rows, creates the `Pending` metadata row for each admitted
//! entry, and hands it to the task server for execution.

use std::sync::Arc;
use std::time::Duration;

use coordinator_store::{AdmissionParams, GroupCap, Store};
use coordinator_taskserver::TaskServer;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

pub struct JobDispatcherConfig {
    pub polling_interval: Duration,
    pub claim_limit: u32,
    pub global_cap: GroupCap,
    pub dependent_priority_boost: i32,
}

impl Default for JobDispatcherConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(2),
            claim_limit: 50,
            global_cap: GroupCap::Unbounded,
            dependent_priority_boost: 4,
        }
    }
}

pub struct JobDispatcher<S: Store, T: TaskServer> {
    store: Arc<S>,
    task_server: Arc<T>,
    config: JobDispatcherConfig,
}

impl<S: Store, T: TaskServer> JobDispatcher<S, T> {
    pub fn new(store: Arc<S>, task_server: Arc<T>, config: JobDispatcherConfig) -> Self {
        Self {
            store,
            task_server,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("job dispatcher starting");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if let Err(e) = self.tick().await {
                error!("job dispatcher tick failed: {e}");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.polling_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
        info!("job dispatcher stopped");
    }

    #[instrument(skip(self))]
    async fn tick(&self) -> Result<(), DispatchTickError> {
        let groups = self.store.list_manifest_groups().await?;
        let group_caps: Vec<(uuid::Uuid, GroupCap)> = groups
            .iter()
            .filter(|g| g.is_enabled)
            .map(|g| {
                let cap = match g.max_active_jobs {
                    Some(max) if max >= 0 => GroupCap::Bounded(max as u32),
                    _ => GroupCap::Unbounded,
                };
                (g.id, cap)
            })
            .collect();

        let admitted = self
            .store
            .claim_next_work_queue(
                AdmissionParams {
                    limit: self.config.claim_limit,
                    global_cap: self.config.global_cap,
                    dependent_boost: self.config.dependent_priority_boost,
                },
                &group_caps,
            )
            .await?;

        debug!(admitted_count = admitted.len(), "job dispatcher tick");

        for entry in admitted {
            let metadata = self
                .store
                .create_metadata(
                    entry.manifest_id,
                    &entry.workflow_name,
                    entry.input.clone(),
                    Some(entry.created_at),
                    entry.retry_count,
                )
                .await?;

            self.store
                .attach_metadata_to_work_queue(entry.id, metadata.id)
                .await?;

            self.task_server
                .enqueue(json!({
                    "metadata_id": metadata.id,
                    "workflow_type_name": entry.workflow_name,
                    "input": entry.input,
                }))
                .await
                .map_err(DispatchTickError::TaskServer)?;
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum DispatchTickError {
    #[error(transparent)]
    Store(#[from] coordinator_store::StoreError),
    #[error("task server enqueue failed: {0}")]
    TaskServer(coordinator_taskserver::TaskServerError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_store::{InMemoryStore, NewWorkQueueEntry};
    use std::sync::Mutex;

    struct RecordingTaskServer {
        enqueued: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait::async_trait]
    impl TaskServer for RecordingTaskServer {
        async fn enqueue(
            &self,
            payload: serde_json::Value,
        ) -> Result<uuid::Uuid, coordinator_taskserver::TaskServerError> {
            self.enqueued.lock().unwrap().push(payload);
            Ok(uuid::Uuid::now_v7())
        }

        async fn claim(
            &self,
            _visibility_timeout: Duration,
        ) -> Result<Option<coordinator_types::BackgroundJob>, coordinator_taskserver::TaskServerError>
        {
            Ok(None)
        }

        async fn complete(
            &self,
            _job_id: uuid::Uuid,
        ) -> Result<(), coordinator_taskserver::TaskServerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn tick_creates_metadata_and_enqueues_to_task_server() {
        let store = Arc::new(InMemoryStore::new());
        store
            .enqueue_work(NewWorkQueueEntry {
                external_id: "wq-1".to_string(),
                workflow_name: "TestWorkflow".to_string(),
                input: serde_json::json!({"n": 1}),
                input_type_name: "TestWorkflow".to_string(),
                manifest_id: None,
                priority: 16,
                retry_count: 0,
            })
            .await
            .unwrap();

        let task_server = Arc::new(RecordingTaskServer {
            enqueued: Mutex::new(Vec::new()),
        });

        let dispatcher = JobDispatcher::new(
            store.clone(),
            task_server.clone(),
            JobDispatcherConfig::default(),
        );
        dispatcher.tick().await.unwrap();

        assert_eq!(task_server.enqueued.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tick_carries_retry_count_into_created_metadata() {
        let store = Arc::new(InMemoryStore::new());
        store
            .enqueue_work(NewWorkQueueEntry {
                external_id: "wq-retry".to_string(),
                workflow_name: "TestWorkflow".to_string(),
                input: serde_json::json!({"n": 1}),
                input_type_name: "TestWorkflow".to_string(),
                manifest_id: None,
                priority: 16,
                retry_count: 2,
            })
            .await
            .unwrap();

        let task_server = Arc::new(RecordingTaskServer {
            enqueued: Mutex::new(Vec::new()),
        });
        let dispatcher = JobDispatcher::new(
            store.clone(),
            task_server.clone(),
            JobDispatcherConfig::default(),
        );
        dispatcher.tick().await.unwrap();

        let enqueued = task_server.enqueued.lock().unwrap();
        let metadata_id: uuid::Uuid =
            serde_json::from_value(enqueued[0]["metadata_id"].clone()).unwrap();
        drop(enqueued);
        let metadata = store.get_metadata(metadata_id).await.unwrap();
        assert_eq!(metadata.retry_count, 2);
    }
}
