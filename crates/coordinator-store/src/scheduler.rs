//! `ManifestScheduler`: the public API configuration code and runtime
//! callers use to declare schedules. Thin orchestration over `Store`, plus
//! the input-type/workflow-registration check (invariant 2) delegated to
//! whatever implements [`WorkflowTypeResolver`] — `coordinator-bus`'s
//! `WorkflowRegistry` in the running process, a stub in tests.

use std::sync::Arc;

use coordinator_types::{Schedule, ScheduleTypeTag};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{NewWorkQueueEntry, Store, UpsertManifestInput};

/// Resolves whether an input's runtime type name has a registered
/// workflow. Implemented by `coordinator-bus::WorkflowRegistry` without
/// this crate depending on it, avoiding a `coordinator-store` <->
/// `coordinator-bus` cycle.
pub trait WorkflowTypeResolver: Send + Sync {
    fn is_registered(&self, workflow_type_name: &str) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("no workflow registered for type `{0}`")]
    UnregisteredWorkflow(String),

    #[error("dependency `{0}` does not exist; schedule the parent manifest first")]
    MissingParent(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Options common to `ScheduleAsync`/`ScheduleDependentAsync`.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    pub priority: i16,
    pub manifest_group_name: Option<String>,
    pub max_retries: i32,
    pub timeout_seconds: Option<i64>,
    pub is_dormant: bool,
}

/// One item in a `ScheduleManyAsync` batch.
#[derive(Debug, Clone)]
pub struct ManyScheduleItem {
    pub external_id: String,
    pub workflow_type_name: String,
    pub input: serde_json::Value,
    pub schedule: Option<Schedule>,
    pub depends_on_external_id: Option<String>,
    pub options: ScheduleOptions,
}

const DEFAULT_GROUP: &str = "default";

pub struct ManifestScheduler<S: Store> {
    store: Arc<S>,
    resolver: Arc<dyn WorkflowTypeResolver>,
}

impl<S: Store> ManifestScheduler<S> {
    pub fn new(store: Arc<S>, resolver: Arc<dyn WorkflowTypeResolver>) -> Self {
        Self { store, resolver }
    }

    fn require_registered(&self, workflow_type_name: &str) -> Result<(), SchedulerError> {
        if self.resolver.is_registered(workflow_type_name) {
            Ok(())
        } else {
            Err(SchedulerError::UnregisteredWorkflow(
                workflow_type_name.to_string(),
            ))
        }
    }

    pub async fn schedule_async(
        &self,
        external_id: &str,
        workflow_type_name: &str,
        input: serde_json::Value,
        schedule: Schedule,
        opts: ScheduleOptions,
    ) -> Result<Uuid, SchedulerError> {
        self.require_registered(workflow_type_name)?;
        let (schedule_type, cron_expression, interval_seconds) = split_schedule(&schedule);

        let manifest = self
            .store
            .upsert_manifest(UpsertManifestInput {
                external_id: external_id.to_string(),
                workflow_type_name: workflow_type_name.to_string(),
                input,
                schedule_type,
                cron_expression,
                interval_seconds,
                is_enabled: true,
                is_dormant: opts.is_dormant,
                max_retries: opts.max_retries,
                timeout_seconds: opts.timeout_seconds,
                priority: coordinator_types::clamp_priority(opts.priority as i32),
                manifest_group_name: opts
                    .manifest_group_name
                    .unwrap_or_else(|| DEFAULT_GROUP.to_string()),
                parent_external_id: None,
            })
            .await?;
        Ok(manifest.id)
    }

    pub async fn schedule_dependent_async(
        &self,
        external_id: &str,
        workflow_type_name: &str,
        input: serde_json::Value,
        depends_on_external_id: &str,
        opts: ScheduleOptions,
    ) -> Result<Uuid, SchedulerError> {
        self.require_registered(workflow_type_name)?;

        let parent = self
            .store
            .get_manifest_by_external_id(depends_on_external_id)
            .await?
            .ok_or_else(|| SchedulerError::MissingParent(depends_on_external_id.to_string()))?;

        let manifest = self
            .store
            .upsert_manifest(UpsertManifestInput {
                external_id: external_id.to_string(),
                workflow_type_name: workflow_type_name.to_string(),
                input,
                schedule_type: ScheduleTypeTag::Dependent,
                cron_expression: None,
                interval_seconds: None,
                is_enabled: true,
                is_dormant: opts.is_dormant,
                max_retries: opts.max_retries,
                timeout_seconds: opts.timeout_seconds,
                priority: coordinator_types::clamp_priority(opts.priority as i32),
                manifest_group_name: opts
                    .manifest_group_name
                    .unwrap_or_else(|| DEFAULT_GROUP.to_string()),
                parent_external_id: Some(parent.external_id),
            })
            .await?;
        Ok(manifest.id)
    }

    /// Atomically upsert the batch; if `prune_prefix` is set, delete any
    /// pre-existing manifest whose `external_id` starts with it but is not
    /// in this batch.
    pub async fn schedule_many_async(
        &self,
        items: Vec<ManyScheduleItem>,
        prune_prefix: Option<&str>,
    ) -> Result<Vec<Uuid>, SchedulerError> {
        let mut inputs = Vec::with_capacity(items.len());
        for item in items {
            self.require_registered(&item.workflow_type_name)?;

            let (schedule_type, cron_expression, interval_seconds) = match (
                &item.schedule,
                &item.depends_on_external_id,
            ) {
                (_, Some(_)) => (ScheduleTypeTag::Dependent, None, None),
                (Some(schedule), None) => split_schedule(schedule),
                (None, None) => (ScheduleTypeTag::None, None, None),
            };

            let parent_external_id = match &item.depends_on_external_id {
                Some(dep) => {
                    let parent = self
                        .store
                        .get_manifest_by_external_id(dep)
                        .await?
                        .ok_or_else(|| SchedulerError::MissingParent(dep.clone()))?;
                    Some(parent.external_id)
                }
                None => None,
            };

            inputs.push(UpsertManifestInput {
                external_id: item.external_id,
                workflow_type_name: item.workflow_type_name,
                input: item.input,
                schedule_type,
                cron_expression,
                interval_seconds,
                is_enabled: true,
                is_dormant: item.options.is_dormant,
                max_retries: item.options.max_retries,
                timeout_seconds: item.options.timeout_seconds,
                priority: coordinator_types::clamp_priority(item.options.priority as i32),
                manifest_group_name: item
                    .options
                    .manifest_group_name
                    .unwrap_or_else(|| DEFAULT_GROUP.to_string()),
                parent_external_id,
            });
        }

        let manifests = self
            .store
            .batch_upsert_and_prune(inputs, prune_prefix)
            .await?;
        Ok(manifests.into_iter().map(|m| m.id).collect())
    }

    pub async fn disable_async(&self, manifest_id: Uuid) -> Result<(), SchedulerError> {
        self.store.set_manifest_enabled(manifest_id, false).await?;
        Ok(())
    }

    pub async fn enable_async(&self, manifest_id: Uuid) -> Result<(), SchedulerError> {
        self.store.set_manifest_enabled(manifest_id, true).await?;
        Ok(())
    }

    /// Create a `work_queue` row immediately at the manifest's stored
    /// priority (no dependent boost). Honors caps (not bypassed) per the
    /// resolution in the design notes; bypasses only the due-time check.
    pub async fn trigger_async(&self, manifest_id: Uuid) -> Result<Uuid, SchedulerError> {
        let manifest = self.store.get_manifest(manifest_id).await?;
        let entry = self
            .store
            .enqueue_work(NewWorkQueueEntry {
                external_id: format!("trigger-{}", Uuid::now_v7()),
                workflow_name: manifest.workflow_type_name.clone(),
                input: manifest.input.clone(),
                input_type_name: manifest.workflow_type_name,
                manifest_id: Some(manifest.id),
                priority: manifest.priority,
                retry_count: 0,
            })
            .await?;
        Ok(entry.id)
    }
}

fn split_schedule(schedule: &Schedule) -> (ScheduleTypeTag, Option<String>, Option<i64>) {
    match schedule {
        Schedule::Cron(expr) => (ScheduleTypeTag::Cron, Some(expr.clone()), None),
        Schedule::Interval(duration) => (
            ScheduleTypeTag::Interval,
            None,
            Some(duration.as_secs() as i64),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    struct AlwaysRegistered;
    impl WorkflowTypeResolver for AlwaysRegistered {
        fn is_registered(&self, _workflow_type_name: &str) -> bool {
            true
        }
    }

    struct NeverRegistered;
    impl WorkflowTypeResolver for NeverRegistered {
        fn is_registered(&self, _workflow_type_name: &str) -> bool {
            false
        }
    }

    fn scheduler_with(resolver: Arc<dyn WorkflowTypeResolver>) -> ManifestScheduler<InMemoryStore> {
        ManifestScheduler::new(Arc::new(InMemoryStore::new()), resolver)
    }

    #[tokio::test]
    async fn schedule_async_rejects_unregistered_workflow() {
        let scheduler = scheduler_with(Arc::new(NeverRegistered));
        let err = scheduler
            .schedule_async(
                "job-1",
                "SomeWorkflow",
                serde_json::json!({}),
                Schedule::interval(std::time::Duration::from_secs(60)).unwrap(),
                ScheduleOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnregisteredWorkflow(_)));
    }

    #[tokio::test]
    async fn schedule_dependent_async_rejects_missing_parent() {
        let scheduler = scheduler_with(Arc::new(AlwaysRegistered));
        let err = scheduler
            .schedule_dependent_async(
                "child",
                "SomeWorkflow",
                serde_json::json!({}),
                "does-not-exist",
                ScheduleOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::MissingParent(_)));
    }

    #[tokio::test]
    async fn schedule_async_then_trigger_enqueues_work() {
        let scheduler = scheduler_with(Arc::new(AlwaysRegistered));
        let id = scheduler
            .schedule_async(
                "job-1",
                "SomeWorkflow",
                serde_json::json!({"a": 1}),
                Schedule::interval(std::time::Duration::from_secs(60)).unwrap(),
                ScheduleOptions::default(),
            )
            .await
            .unwrap();

        let work_id = scheduler.trigger_async(id).await.unwrap();
        assert_ne!(work_id, Uuid::nil());
    }
}
