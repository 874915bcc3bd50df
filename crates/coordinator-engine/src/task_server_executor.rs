//! TaskServerExecutor: runs the workflow referenced by a claimed
//! `background_job` payload through the `WorkflowBus`, and maps the outcome
//! onto the metadata/work-queue/dead-letter state machine (§4.4, §4.7).
//! Claim/complete is the `WorkerPool`'s job — `execute` is handed to it as a
//! [`coordinator_taskserver::JobHandler`].

use std::sync::Arc;

use chrono::Utc;
use coordinator_bus::{DispatchError, WorkflowBus};
use coordinator_store::{NewWorkQueueEntry, Store};
use coordinator_types::{Metadata, MetadataState};
use serde::Deserialize;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::retry::RetryPolicy;

pub struct TaskServerExecutorConfig {
    pub retry_policy: RetryPolicy,
}

impl Default for TaskServerExecutorConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[derive(Deserialize)]
struct JobPayload {
    metadata_id: Uuid,
    workflow_type_name: String,
    input: serde_json::Value,
}

pub struct TaskServerExecutor<S: Store> {
    store: Arc<S>,
    bus: WorkflowBus,
    config: TaskServerExecutorConfig,
}

impl<S: Store> TaskServerExecutor<S> {
    pub fn new(store: Arc<S>, bus: WorkflowBus, config: TaskServerExecutorConfig) -> Self {
        Self { store, bus, config }
    }

    /// Runs one claimed job to completion. Never returns an error to the
    /// caller — failures are logged and, where possible, routed into the
    /// retry/dead-letter state machine instead of propagated, since the
    /// worker pool has nothing useful to do with a handler error.
    #[instrument(skip(self, payload))]
    pub async fn execute(&self, payload: serde_json::Value) {
        if let Err(e) = self.try_execute(payload).await {
            error!("task server executor failed handling job: {e}");
        }
    }

    async fn try_execute(
        &self,
        payload: serde_json::Value,
    ) -> Result<(), coordinator_store::StoreError> {
        let parsed: JobPayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => {
                error!("background job has unparseable payload: {e}");
                return Ok(());
            }
        };

        let metadata = self.store.get_metadata(parsed.metadata_id).await?;

        self.store
            .transition_metadata(
                metadata.id,
                MetadataState::Pending,
                MetadataState::InProgress,
                Some(Utc::now()),
                None,
                None,
            )
            .await?;

        // Re-read before running: a cancellation requested between dispatch
        // enqueue and claim should pre-empt the workflow entirely.
        let metadata = self.store.get_metadata(metadata.id).await?;
        if metadata.cancellation_requested {
            self.store
                .transition_metadata(
                    metadata.id,
                    MetadataState::InProgress,
                    MetadataState::Cancelled,
                    None,
                    Some(Utc::now()),
                    None,
                )
                .await?;
            return Ok(());
        }

        let result = self
            .bus
            .dispatch(&parsed.workflow_type_name, parsed.input.clone())
            .await;

        self.handle_outcome(&metadata, parsed, result).await
    }

    async fn handle_outcome(
        &self,
        metadata: &Metadata,
        payload: JobPayload,
        result: Result<serde_json::Value, DispatchError>,
    ) -> Result<(), coordinator_store::StoreError> {
        let ended_at = Utc::now();

        match result {
            Ok(output) => {
                self.store
                    .transition_metadata(
                        metadata.id,
                        MetadataState::InProgress,
                        MetadataState::Completed,
                        None,
                        Some(ended_at),
                        Some(output),
                    )
                    .await?;
                if let Some(manifest_id) = metadata.manifest_id {
                    self.store.mark_manifest_succeeded(manifest_id, ended_at).await?;
                }
                Ok(())
            }
            Err(DispatchError::Workflow(err)) if !err.retryable => {
                warn!("non-retryable workflow error for metadata {}: {}", metadata.id, err.message);
                self.fail_and_route(metadata, &payload, &err.message, ended_at, true).await
            }
            Err(err) => {
                let message = err.to_string();
                warn!("workflow failed for metadata {}: {message}", metadata.id);
                self.fail_and_route(metadata, &payload, &message, ended_at, false).await
            }
        }
    }

    async fn fail_and_route(
        &self,
        metadata: &Metadata,
        payload: &JobPayload,
        reason: &str,
        ended_at: chrono::DateTime<Utc>,
        force_dead_letter: bool,
    ) -> Result<(), coordinator_store::StoreError> {
        self.store
            .transition_metadata(
                metadata.id,
                MetadataState::InProgress,
                MetadataState::Failed,
                None,
                Some(ended_at),
                None,
            )
            .await?;

        let Some(manifest_id) = metadata.manifest_id else {
            return Ok(());
        };
        let manifest = self.store.get_manifest(manifest_id).await?;
        let retry_count = self.store.increment_retry_count(metadata.id).await?;

        if !force_dead_letter && !self.config.retry_policy.exhausted(retry_count, manifest.max_retries) {
            let delay = self.config.retry_policy.delay_for(retry_count - 1);
            let store = self.store.clone();
            let metadata_id = metadata.id;
            let entry = NewWorkQueueEntry {
                external_id: format!("retry-{}-{}", metadata_id, Uuid::now_v7()),
                workflow_name: payload.workflow_type_name.clone(),
                input: payload.input.clone(),
                input_type_name: payload.workflow_type_name.clone(),
                manifest_id: Some(manifest_id),
                priority: manifest.priority,
                retry_count,
            };
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = store.enqueue_work(entry).await {
                    error!("failed to enqueue retry for metadata {metadata_id}: {e}");
                }
            });
        } else {
            self.store
                .create_dead_letter(manifest_id, reason, retry_count)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_bus::{Workflow, WorkflowError};
    use coordinator_store::{InMemoryStore, UpsertManifestInput};
    use coordinator_types::ScheduleTypeTag;
    use serde::Serialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo {
        value: i32,
    }

    struct AlwaysFails;

    #[async_trait::async_trait]
    impl Workflow for AlwaysFails {
        const TYPE: &'static str = "always-fails";
        type Input = Echo;
        type Output = Echo;

        async fn run(&self, _input: Self::Input) -> Result<Self::Output, WorkflowError> {
            Err(WorkflowError::new("boom"))
        }
    }

    struct Succeeds;

    #[async_trait::async_trait]
    impl Workflow for Succeeds {
        const TYPE: &'static str = "succeeds";
        type Input = Echo;
        type Output = Echo;

        async fn run(&self, input: Self::Input) -> Result<Self::Output, WorkflowError> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn execute_completes_metadata_on_success() {
        let store = Arc::new(InMemoryStore::new());
        let bus = WorkflowBus::new();
        bus.register(Succeeds).unwrap();

        let metadata = store
            .create_metadata(None, "succeeds", serde_json::json!({"value": 1}), None, 0)
            .await
            .unwrap();

        let executor = TaskServerExecutor::new(store.clone(), bus, TaskServerExecutorConfig::default());
        executor
            .execute(serde_json::json!({
                "metadata_id": metadata.id,
                "workflow_type_name": "succeeds",
                "input": {"value": 1},
            }))
            .await;

        let updated = store.get_metadata(metadata.id).await.unwrap();
        assert_eq!(updated.state, MetadataState::Completed);
    }

    #[tokio::test]
    async fn execute_fails_metadata_without_a_manifest() {
        let store = Arc::new(InMemoryStore::new());
        let bus = WorkflowBus::new();
        bus.register(AlwaysFails).unwrap();

        let metadata = store
            .create_metadata(None, "always-fails", serde_json::json!({"value": 1}), None, 0)
            .await
            .unwrap();

        let executor = TaskServerExecutor::new(store.clone(), bus, TaskServerExecutorConfig::default());
        executor
            .execute(serde_json::json!({
                "metadata_id": metadata.id,
                "workflow_type_name": "always-fails",
                "input": {"value": 1},
            }))
            .await;

        let updated = store.get_metadata(metadata.id).await.unwrap();
        assert_eq!(updated.state, MetadataState::Failed);
    }

    #[tokio::test]
    async fn execute_dead_letters_once_retries_exhausted() {
        let store = Arc::new(InMemoryStore::new());
        let bus = WorkflowBus::new();
        bus.register(AlwaysFails).unwrap();

        let manifest = store
            .upsert_manifest(UpsertManifestInput {
                external_id: "always-fails-manifest".to_string(),
                workflow_type_name: "always-fails".to_string(),
                input: serde_json::json!({"value": 1}),
                schedule_type: ScheduleTypeTag::OnDemand,
                cron_expression: None,
                interval_seconds: None,
                is_enabled: true,
                is_dormant: false,
                max_retries: 2,
                timeout_seconds: None,
                priority: 16,
                manifest_group_name: "default".to_string(),
                parent_external_id: None,
            })
            .await
            .unwrap();

        // Seeded one below the boundary so this single execution's
        // increment crosses `max_retries` and routes straight to the dead
        // letter instead of spawning a detached retry.
        let metadata = store
            .create_metadata(
                Some(manifest.id),
                "always-fails",
                serde_json::json!({"value": 1}),
                None,
                manifest.max_retries - 1,
            )
            .await
            .unwrap();

        let executor = TaskServerExecutor::new(store.clone(), bus, TaskServerExecutorConfig::default());
        executor
            .execute(serde_json::json!({
                "metadata_id": metadata.id,
                "workflow_type_name": "always-fails",
                "input": {"value": 1},
            }))
            .await;

        let updated = store.get_metadata(metadata.id).await.unwrap();
        assert_eq!(updated.state, MetadataState::Failed);

        let dead_letters = store.list_dead_letters_for_manifest(manifest.id).await.unwrap();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].retry_count_at_dead_letter, manifest.max_retries);
    }

    #[tokio::test]
    async fn execute_retries_instead_of_dead_lettering_before_exhaustion() {
        let store = Arc::new(InMemoryStore::new());
        let bus = WorkflowBus::new();
        bus.register(AlwaysFails).unwrap();

        let manifest = store
            .upsert_manifest(UpsertManifestInput {
                external_id: "always-fails-manifest-2".to_string(),
                workflow_type_name: "always-fails".to_string(),
                input: serde_json::json!({"value": 1}),
                schedule_type: ScheduleTypeTag::OnDemand,
                cron_expression: None,
                interval_seconds: None,
                is_enabled: true,
                is_dormant: false,
                max_retries: 3,
                timeout_seconds: None,
                priority: 16,
                manifest_group_name: "default".to_string(),
                parent_external_id: None,
            })
            .await
            .unwrap();

        let metadata = store
            .create_metadata(
                Some(manifest.id),
                "always-fails",
                serde_json::json!({"value": 1}),
                None,
                0,
            )
            .await
            .unwrap();

        let mut config = TaskServerExecutorConfig::default();
        config.retry_policy.base_delay = std::time::Duration::from_millis(1);
        config.retry_policy.jitter = 0.0;
        let executor = TaskServerExecutor::new(store.clone(), bus, config);
        executor
            .execute(serde_json::json!({
                "metadata_id": metadata.id,
                "workflow_type_name": "always-fails",
                "input": {"value": 1},
            }))
            .await;

        assert!(store
            .list_dead_letters_for_manifest(manifest.id)
            .await
            .unwrap()
            .is_empty());
    }
}
