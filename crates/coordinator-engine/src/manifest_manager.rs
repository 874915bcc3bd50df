//! ManifestManager: periodically scans enabled manifests and emits
//! work-queue entries when they're due (§4.5).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use coordinator_store::{NewWorkQueueEntry, Store};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

pub struct ManifestManagerConfig {
    pub polling_interval: Duration,
}

impl Default for ManifestManagerConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(5),
        }
    }
}

pub struct ManifestManager<S: Store> {
    store: Arc<S>,
    config: ManifestManagerConfig,
}

impl<S: Store> ManifestManager<S> {
    pub fn new(store: Arc<S>, config: ManifestManagerConfig) -> Self {
        Self { store, config }
    }

    /// Runs until `shutdown_rx` reports `true`.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("manifest manager starting");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if let Err(e) = self.tick(Utc::now()).await {
                error!("manifest manager tick failed: {e}");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.polling_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
        }
        info!("manifest manager stopped");
    }

    #[instrument(skip(self))]
    async fn tick(&self, now: chrono::DateTime<Utc>) -> Result<(), coordinator_store::StoreError> {
        let due = self.store.list_due_manifests(now).await?;
        debug!(due_count = due.len(), "manifest manager tick");

        for manifest in due {
            if self.store.has_queued_entry_for_manifest(manifest.id).await? {
                continue;
            }

            self.store
                .enqueue_work(NewWorkQueueEntry {
                    external_id: format!("due-{}-{}", manifest.external_id, uuid::Uuid::now_v7()),
                    workflow_name: manifest.workflow_type_name.clone(),
                    input: manifest.input.clone(),
                    input_type_name: manifest.workflow_type_name,
                    manifest_id: Some(manifest.id),
                    priority: manifest.priority,
                    retry_count: 0,
                })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_store::{InMemoryStore, UpsertManifestInput};
    use coordinator_types::ScheduleTypeTag;

    fn interval_manifest(external_id: &str, seconds: i64) -> UpsertManifestInput {
        UpsertManifestInput {
            external_id: external_id.to_string(),
            workflow_type_name: "TestWorkflow".to_string(),
            input: serde_json::json!({}),
            schedule_type: ScheduleTypeTag::Interval,
            cron_expression: None,
            interval_seconds: Some(seconds),
            is_enabled: true,
            is_dormant: false,
            max_retries: 3,
            timeout_seconds: None,
            priority: 16,
            manifest_group_name: "default".to_string(),
            parent_external_id: None,
        }
    }

    #[tokio::test]
    async fn tick_enqueues_due_interval_manifest_once() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_manifest(interval_manifest("job-1", 60)).await.unwrap();

        let manager = ManifestManager::new(store.clone(), ManifestManagerConfig::default());
        manager.tick(Utc::now()).await.unwrap();
        manager.tick(Utc::now()).await.unwrap();

        let manifest = store
            .get_manifest_by_external_id("job-1")
            .await
            .unwrap()
            .unwrap();
        assert!(store
            .has_queued_entry_for_manifest(manifest.id)
            .await
            .unwrap());
    }
}
