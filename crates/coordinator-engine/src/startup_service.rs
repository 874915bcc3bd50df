//! StartupService: the ordered boot sequence run once before any poll loop
//! starts (§4.8) — seed declared manifests, prune orphan groups, recover
//! jobs stuck `InProgress` from a prior crash.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use coordinator_store::{NewWorkQueueEntry, Store, UpsertManifestInput};
use coordinator_types::DagValidator;
use tracing::{info, instrument, warn};

use crate::retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Store(#[from] coordinator_store::StoreError),

    /// The `parentRef` edges, projected onto group names, contain a cycle —
    /// fatal at startup so no poller ever sees an unorderable group graph.
    #[error("cyclic manifest group dependency detected among groups: {0:?}")]
    CyclicGroupDependency(Vec<String>),
}

/// One group's worth of declared manifests to reconcile via a single
/// `BatchUpsertAndPrune` call.
pub struct ManifestSeed {
    pub items: Vec<UpsertManifestInput>,
    pub prune_prefix: Option<String>,
}

pub struct StartupServiceConfig {
    pub recover_stuck_jobs_on_startup: bool,
    pub retry_policy: RetryPolicy,
}

impl Default for StartupServiceConfig {
    fn default() -> Self {
        Self {
            recover_stuck_jobs_on_startup: true,
            retry_policy: RetryPolicy::default(),
        }
    }
}

pub struct StartupService<S: Store> {
    store: Arc<S>,
    config: StartupServiceConfig,
}

impl<S: Store> StartupService<S> {
    pub fn new(store: Arc<S>, config: StartupServiceConfig) -> Self {
        Self { store, config }
    }

    #[instrument(skip(self, seeds))]
    pub async fn run(&self, seeds: Vec<ManifestSeed>) -> Result<(), StartupError> {
        for seed in seeds {
            self.store
                .batch_upsert_and_prune(seed.items, seed.prune_prefix.as_deref())
                .await?;
        }

        let orphans = self.store.prune_orphan_groups().await?;
        if !orphans.is_empty() {
            info!(count = orphans.len(), "pruned orphan manifest groups");
        }

        self.validate_group_dependency_graph().await?;

        if self.config.recover_stuck_jobs_on_startup {
            self.recover_stuck_jobs().await?;
        }

        Ok(())
    }

    /// Builds the group dependency graph projected from every manifest's
    /// `parent_manifest_id` edge (invariant 5: the `parentRef` graph
    /// projected onto group names must be acyclic) and fails startup before
    /// the same-group edges; a dependent manifest whose parent lives in the
    /// same group can never itself form a cycle across groups.
    async fn validate_group_dependency_graph(&self) -> Result<(), StartupError> {
        let manifests = self.store.list_manifests().await?;
        let by_id: HashMap<_, _> = manifests.iter().map(|m| (m.id, m)).collect();

        let mut validator = DagValidator::new();
        for manifest in &manifests {
            validator.add_node(manifest.manifest_group_id);
            let Some(parent_id) = manifest.parent_manifest_id else {
                continue;
            };
            let Some(parent) = by_id.get(&parent_id) else {
                continue;
            };
            if manifest.manifest_group_id == parent.manifest_group_id {
                continue;
            }
            // `add_edge` only rejects equal child/parent, already excluded above.
            validator
                .add_edge(manifest.manifest_group_id, parent.manifest_group_id)
                .ok();
        }

        if let Err(coordinator_types::DagValidatorError::CycleDetected(group_ids)) =
            validator.validate()
        {
            let groups = self.store.list_manifest_groups().await?;
            let names: HashMap<_, _> = groups.iter().map(|g| (g.id, g.name.clone())).collect();
            let group_names = group_ids
                .iter()
                .map(|id| names.get(id).cloned().unwrap_or_else(|| id.to_string()))
                .collect();
            return Err(StartupError::CyclicGroupDependency(group_names));
        }

        Ok(())
    }

    async fn recover_stuck_jobs(&self) -> Result<(), StartupError> {
        let stuck = self.store.list_in_progress_metadata().await?;
        if stuck.is_empty() {
            return Ok(());
        }
        warn!(count = stuck.len(), "recovering jobs stuck in progress on startup");

        for metadata in stuck {
            let ended_at = Utc::now();
            self.store
                .transition_metadata(
                    metadata.id,
                    coordinator_types::MetadataState::InProgress,
                    coordinator_types::MetadataState::Failed,
                    None,
                    Some(ended_at),
                    None,
                )
                .await?;

            let Some(manifest_id) = metadata.manifest_id else {
                continue;
            };
            let manifest = self.store.get_manifest(manifest_id).await?;
            let retry_count = self.store.increment_retry_count(metadata.id).await?;

            if !self.config.retry_policy.exhausted(retry_count, manifest.max_retries) {
                self.store
                    .enqueue_work(NewWorkQueueEntry {
                        external_id: format!(
                            "startup-recover-{}-{}",
                            metadata.id,
                            uuid::Uuid::now_v7()
                        ),
                        workflow_name: metadata.workflow_name.clone(),
                        input: metadata.input.clone(),
                        input_type_name: metadata.workflow_name.clone(),
                        manifest_id: Some(manifest_id),
                        priority: manifest.priority,
                        retry_count,
                    })
                    .await?;
            } else {
                self.store
                    .create_dead_letter(manifest_id, "recovered on startup", retry_count)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_store::InMemoryStore;
    use coordinator_types::ScheduleTypeTag;

    fn manifest_input(external_id: &str) -> UpsertManifestInput {
        UpsertManifestInput {
            external_id: external_id.to_string(),
            workflow_type_name: "TestWorkflow".to_string(),
            input: serde_json::json!({}),
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
        }
    }

    #[tokio::test]
    async fn run_seeds_manifests() {
        let store = Arc::new(InMemoryStore::new());
        let service = StartupService::new(store.clone(), StartupServiceConfig::default());

        service
            .run(vec![ManifestSeed {
                items: vec![manifest_input("job-1")],
                prune_prefix: None,
            }])
            .await
            .unwrap();

        assert!(store
            .get_manifest_by_external_id("job-1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn recovers_stuck_in_progress_metadata() {
        let store = Arc::new(InMemoryStore::new());
        let manifest = store.upsert_manifest(manifest_input("job-1")).await.unwrap();
        let metadata = store
            .create_metadata(Some(manifest.id), "TestWorkflow", serde_json::json!({}), None, 0)
            .await
            .unwrap();
        store
            .transition_metadata(
                metadata.id,
                coordinator_types::MetadataState::Pending,
                coordinator_types::MetadataState::InProgress,
                Some(Utc::now()),
                None,
                None,
            )
            .await
            .unwrap();

        let service = StartupService::new(store.clone(), StartupServiceConfig::default());
        service.run(vec![]).await.unwrap();

        let recovered = store.get_metadata(metadata.id).await.unwrap();
        assert_eq!(recovered.state, coordinator_types::MetadataState::Failed);
        assert!(store.has_queued_entry_for_manifest(manifest.id).await.unwrap());
    }

    #[tokio::test]
    async fn run_fails_startup_on_cyclic_group_dependency() {
        let store = Arc::new(InMemoryStore::new());

        let mut a = manifest_input("job-a");
        a.manifest_group_name = "group-a".to_string();
        store.upsert_manifest(a.clone()).await.unwrap();

        let mut b = manifest_input("job-b");
        b.manifest_group_name = "group-b".to_string();
        b.schedule_type = ScheduleTypeTag::Dependent;
        b.parent_external_id = Some("job-a".to_string());
        store.upsert_manifest(b).await.unwrap();

        // Rewire job-a onto job-b, closing the cycle across group-a <-> group-b.
        a.schedule_type = ScheduleTypeTag::Dependent;
        a.parent_external_id = Some("job-b".to_string());
        store.upsert_manifest(a).await.unwrap();

        let service = StartupService::new(store.clone(), StartupServiceConfig::default());
        let err = service.run(vec![]).await.unwrap_err();
        assert!(matches!(err, StartupError::CyclicGroupDependency(_)));
    }

    #[tokio::test]
    async fn run_allows_dependent_manifest_within_the_same_group() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_manifest(manifest_input("parent")).await.unwrap();

        let mut child = manifest_input("child");
        child.schedule_type = ScheduleTypeTag::Dependent;
        child.parent_external_id = Some("parent".to_string());
        store.upsert_manifest(child).await.unwrap();

        let service = StartupService::new(store.clone(), StartupServiceConfig::default());
        service.run(vec![]).await.unwrap();
    }
}
