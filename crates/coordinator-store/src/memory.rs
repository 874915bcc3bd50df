//! An in-memory `Store` implementation used by unit tests and by
//! `coordinator-engine`'s own test suite, so poll-loop logic can be
//! exercised without a Postgres instance. Not used by `coordinator-service`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordinator_types::{
    is_due, BackgroundJob, DeadLetter, DeadLetterStatus, Manifest, ManifestGroup, Metadata,
    MetadataState, ScheduleKind, WorkQueueEntry, WorkQueueStatus,
};
use uuid::Uuid;

use crate::dispatch::{admit, sort_candidates, Candidate};
use crate::error::StoreError;
use crate::store::{AdmissionParams, NewWorkQueueEntry, Store, UpsertManifestInput};

#[derive(Default)]
struct Inner {
    groups: HashMap<Uuid, ManifestGroup>,
    group_by_name: HashMap<String, Uuid>,
    manifests: HashMap<Uuid, Manifest>,
    manifest_by_external_id: HashMap<String, Uuid>,
    metadata: HashMap<Uuid, Metadata>,
    work_queue: HashMap<Uuid, WorkQueueEntry>,
    dead_letters: HashMap<Uuid, DeadLetter>,
    background_jobs: HashMap<Uuid, BackgroundJob>,
}

pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_manifest_group(
        &self,
        name: &str,
        priority: i16,
        max_active_jobs: Option<i32>,
    ) -> Result<ManifestGroup, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&id) = inner.group_by_name.get(name) {
            let group = inner.groups.get_mut(&id).unwrap();
            group.priority = priority;
            group.max_active_jobs = max_active_jobs;
            group.updated_at = Utc::now();
            return Ok(group.clone());
        }
        let now = Utc::now();
        let group = ManifestGroup {
            id: Uuid::now_v7(),
            name: name.to_string(),
            priority,
            max_active_jobs,
            is_enabled: true,
            created_at: now,
            updated_at: now,
        };
        inner.group_by_name.insert(name.to_string(), group.id);
        inner.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn get_manifest_group(&self, id: Uuid) -> Result<ManifestGroup, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .groups
            .get(&id)
            .cloned()
            .ok_or(StoreError::ManifestGroupNotFound(id))
    }

    async fn prune_orphan_groups(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let referenced: std::collections::HashSet<Uuid> = inner
            .manifests
            .values()
            .map(|m| m.manifest_group_id)
            .collect();
        let orphans: Vec<Uuid> = inner
            .groups
            .keys()
            .filter(|id| !referenced.contains(id))
            .copied()
            .collect();
        for id in &orphans {
            if let Some(group) = inner.groups.remove(id) {
                inner.group_by_name.remove(&group.name);
            }
        }
        Ok(orphans)
    }

    async fn list_manifest_groups(&self) -> Result<Vec<ManifestGroup>, StoreError> {
        Ok(self.inner.lock().unwrap().groups.values().cloned().collect())
    }

    async fn upsert_manifest(&self, input: UpsertManifestInput) -> Result<Manifest, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let group_id = resolve_or_create_group(&mut inner, &input.manifest_group_name);
        let parent_id = match &input.parent_external_id {
            Some(parent_external_id) => Some(
                *inner
                    .manifest_by_external_id
                    .get(parent_external_id)
                    .ok_or_else(|| StoreError::MissingParent(parent_external_id.clone()))?,
            ),
            None => None,
        };

        if let Some(&id) = inner.manifest_by_external_id.get(&input.external_id) {
            let existing_last_run = inner.manifests.get(&id).unwrap().last_successful_run;
            let manifest = inner.manifests.get_mut(&id).unwrap();
            manifest.workflow_type_name = input.workflow_type_name;
            manifest.input = input.input;
            manifest.schedule_type = input.schedule_type;
            manifest.cron_expression = input.cron_expression;
            manifest.interval_seconds = input.interval_seconds;
            manifest.is_enabled = input.is_enabled;
            manifest.is_dormant = input.is_dormant;
            manifest.max_retries = input.max_retries;
            manifest.timeout_seconds = input.timeout_seconds;
            manifest.priority = input.priority;
            manifest.manifest_group_id = group_id;
            manifest.parent_manifest_id = parent_id;
            manifest.last_successful_run = existing_last_run;
            manifest.updated_at = Utc::now();
            return Ok(manifest.clone());
        }

        let now = Utc::now();
        let manifest = Manifest {
            id: Uuid::now_v7(),
            external_id: input.external_id.clone(),
            workflow_type_name: input.workflow_type_name,
            input: input.input,
            schedule_type: input.schedule_type,
            cron_expression: input.cron_expression,
            interval_seconds: input.interval_seconds,
            is_enabled: input.is_enabled,
            is_dormant: input.is_dormant,
            max_retries: input.max_retries,
            timeout_seconds: input.timeout_seconds,
            priority: input.priority,
            manifest_group_id: group_id,
            parent_manifest_id: parent_id,
            last_successful_run: None,
            created_at: now,
            updated_at: now,
        };
        inner
            .manifest_by_external_id
            .insert(manifest.external_id.clone(), manifest.id);
        inner.manifests.insert(manifest.id, manifest.clone());
        Ok(manifest)
    }

    async fn batch_upsert_and_prune(
        &self,
        items: Vec<UpsertManifestInput>,
        prune_prefix: Option<&str>,
    ) -> Result<Vec<Manifest>, StoreError> {
        let mut upserted = Vec::with_capacity(items.len());
        for item in items {
            upserted.push(self.upsert_manifest(item).await?);
        }

        if let Some(prefix) = prune_prefix {
            let kept: std::collections::HashSet<String> =
                upserted.iter().map(|m| m.external_id.clone()).collect();
            let mut inner = self.inner.lock().unwrap();
            let to_remove: Vec<Uuid> = inner
                .manifests
                .values()
                .filter(|m| m.external_id.starts_with(prefix) && !kept.contains(&m.external_id))
                .map(|m| m.id)
                .collect();
            for id in to_remove {
                if let Some(manifest) = inner.manifests.remove(&id) {
                    inner.manifest_by_external_id.remove(&manifest.external_id);
                }
                inner.dead_letters.retain(|_, dl| dl.manifest_id != id);
                inner.work_queue.retain(|_, wq| wq.manifest_id != Some(id));
            }
        }

        Ok(upserted)
    }

    async fn get_manifest(&self, id: Uuid) -> Result<Manifest, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .manifests
            .get(&id)
            .cloned()
            .ok_or(StoreError::ManifestNotFound(id))
    }

    async fn get_manifest_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Manifest>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .manifest_by_external_id
            .get(external_id)
            .and_then(|id| inner.manifests.get(id))
            .cloned())
    }

    async fn list_manifests(&self) -> Result<Vec<Manifest>, StoreError> {
        Ok(self.inner.lock().unwrap().manifests.values().cloned().collect())
    }

    async fn set_manifest_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let manifest = inner
            .manifests
            .get_mut(&id)
            .ok_or(StoreError::ManifestNotFound(id))?;
        manifest.is_enabled = enabled;
        Ok(())
    }

    async fn list_due_manifests(&self, now: DateTime<Utc>) -> Result<Vec<Manifest>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let due = inner
            .manifests
            .values()
            .filter(|m| m.is_enabled)
            .filter(|m| {
                let parent_last_successful_run = match m.schedule_kind() {
                    ScheduleKind::Dependent(parent_id) => {
                        inner.manifests.get(&parent_id).and_then(|p| p.last_successful_run)
                    }
                    _ => None,
                };
                is_due(m, now, parent_last_successful_run)
            })
            .cloned()
            .collect();
        Ok(due)
    }

    async fn mark_manifest_succeeded(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let manifest = inner
            .manifests
            .get_mut(&id)
            .ok_or(StoreError::ManifestNotFound(id))?;
        manifest.last_successful_run = Some(ended_at);
        Ok(())
    }

    async fn count_active_jobs(
        &self,
        excluded_workflow_types: &[String],
        group_id: Option<Uuid>,
    ) -> Result<u32, StoreError> {
        let inner = self.inner.lock().unwrap();
        let count = inner
            .metadata
            .values()
            .filter(|m| m.state.is_active())
            .filter(|m| !excluded_workflow_types.iter().any(|t| t == &m.workflow_name))
            .filter(|m| match group_id {
                None => true,
                Some(gid) => m
                    .manifest_id
                    .and_then(|mid| inner.manifests.get(&mid))
                    .map(|manifest| manifest.manifest_group_id == gid)
                    .unwrap_or(false),
            })
            .count();
        Ok(count as u32)
    }

    async fn create_metadata(
        &self,
        manifest_id: Option<Uuid>,
        workflow_name: &str,
        input: serde_json::Value,
        scheduled_time: Option<DateTime<Utc>>,
        retry_count: i32,
    ) -> Result<Metadata, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let metadata = Metadata {
            id: Uuid::now_v7(),
            external_id: Uuid::now_v7().to_string(),
            manifest_id,
            workflow_name: workflow_name.to_string(),
            input,
            output: None,
            state: MetadataState::Pending,
            scheduled_time,
            started_at: None,
            ended_at: None,
            retry_count,
            currently_running_step: None,
            cancellation_requested: false,
        };
        inner.metadata.insert(metadata.id, metadata.clone());
        Ok(metadata)
    }

    async fn get_metadata(&self, id: Uuid) -> Result<Metadata, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .metadata
            .get(&id)
            .cloned()
            .ok_or(StoreError::MetadataNotFound(id))
    }

    async fn transition_metadata(
        &self,
        id: Uuid,
        from: MetadataState,
        to: MetadataState,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
        output: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let metadata = inner
            .metadata
            .get_mut(&id)
            .ok_or(StoreError::MetadataNotFound(id))?;
        if metadata.state != from {
            return Err(StoreError::StoreConflict {
                entity: "metadata",
                expected: format!("{from:?}"),
                actual: format!("{:?}", metadata.state),
            });
        }
        metadata.state = to;
        if started_at.is_some() {
            metadata.started_at = started_at;
        }
        if ended_at.is_some() {
            metadata.ended_at = ended_at;
        }
        if output.is_some() {
            metadata.output = output;
        }
        Ok(())
    }

    async fn increment_retry_count(&self, id: Uuid) -> Result<i32, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let metadata = inner
            .metadata
            .get_mut(&id)
            .ok_or(StoreError::MetadataNotFound(id))?;
        metadata.retry_count += 1;
        Ok(metadata.retry_count)
    }

    async fn request_cancellation(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let metadata = inner
            .metadata
            .get_mut(&id)
            .ok_or(StoreError::MetadataNotFound(id))?;
        metadata.cancellation_requested = true;
        Ok(())
    }

    async fn list_in_progress_metadata(&self) -> Result<Vec<Metadata>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .metadata
            .values()
            .filter(|m| m.state == MetadataState::InProgress)
            .cloned()
            .collect())
    }

    async fn purge_terminal_metadata(
        &self,
        whitelist: &[String],
        older_than: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let to_remove: Vec<Uuid> = inner
            .metadata
            .values()
            .filter(|m| m.state.is_terminal())
            .filter(|m| whitelist.iter().any(|w| w == &m.workflow_name))
            .filter(|m| m.ended_at.map(|ended| ended < older_than).unwrap_or(false))
            .map(|m| m.id)
            .collect();
        let count = to_remove.len() as u64;
        for id in to_remove {
            inner.metadata.remove(&id);
        }
        Ok(count)
    }

    async fn enqueue_work(&self, entry: NewWorkQueueEntry) -> Result<WorkQueueEntry, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let row = WorkQueueEntry {
            id: Uuid::now_v7(),
            external_id: entry.external_id,
            workflow_name: entry.workflow_name,
            input: entry.input,
            input_type_name: entry.input_type_name,
            manifest_id: entry.manifest_id,
            metadata_id: None,
            priority: entry.priority,
            status: WorkQueueStatus::Queued,
            retry_count: entry.retry_count,
            created_at: Utc::now(),
            dispatched_at: None,
        };
        inner.work_queue.insert(row.id, row.clone());
        Ok(row)
    }

    async fn has_queued_entry_for_manifest(&self, manifest_id: Uuid) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.work_queue.values().any(|wq| {
            wq.manifest_id == Some(manifest_id) && wq.status == WorkQueueStatus::Queued
        }))
    }

    async fn claim_next_work_queue(
        &self,
        params: AdmissionParams,
        group_caps: &[(Uuid, crate::store::GroupCap)],
    ) -> Result<Vec<WorkQueueEntry>, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let mut candidates: Vec<Candidate> = Vec::new();
        for wq in inner.work_queue.values() {
            if wq.status != WorkQueueStatus::Queued {
                continue;
            }
            let manifest = wq.manifest_id.and_then(|id| inner.manifests.get(&id));
            if let Some(manifest) = manifest {
                if !manifest.is_enabled {
                    continue;
                }
                if let Some(group) = inner.groups.get(&manifest.manifest_group_id) {
                    if !group.is_enabled {
                        continue;
                    }
                }
            }
            let group_id = manifest
                .map(|m| m.manifest_group_id)
                .unwrap_or_else(Uuid::nil);
            let is_dependent = manifest
                .map(|m| matches!(m.schedule_kind(), ScheduleKind::Dependent(_)))
                .unwrap_or(false);
            candidates.push(Candidate {
                id: wq.id,
                group_id,
                priority: wq.priority,
                is_dependent,
                created_at: wq.created_at,
            });
        }

        sort_candidates(&mut candidates, params.dependent_boost);
        candidates.truncate(params.limit as usize);

        let group_cap_map: HashMap<Uuid, crate::store::GroupCap> =
            group_caps.iter().cloned().collect();
        let admitted_ids = admit(
            &candidates,
            params.global_cap,
            &group_cap_map,
            0,
            HashMap::new(),
        );

        let mut admitted = Vec::with_capacity(admitted_ids.len());
        for id in admitted_ids {
            let row = inner.work_queue.get_mut(&id).unwrap();
            row.status = WorkQueueStatus::Dispatched;
            row.dispatched_at = Some(Utc::now());
            admitted.push(row.clone());
        }
        Ok(admitted)
    }

    async fn attach_metadata_to_work_queue(
        &self,
        work_queue_id: Uuid,
        metadata_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .work_queue
            .get_mut(&work_queue_id)
            .ok_or(StoreError::WorkQueueEntryNotFound(work_queue_id))?;
        row.metadata_id = Some(metadata_id);
        Ok(())
    }

    async fn create_dead_letter(
        &self,
        manifest_id: Uuid,
        reason: &str,
        retry_count_at_dead_letter: i32,
    ) -> Result<DeadLetter, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let dead_letter = DeadLetter {
            id: Uuid::now_v7(),
            manifest_id,
            reason: reason.to_string(),
            retry_count_at_dead_letter,
            status: DeadLetterStatus::AwaitingIntervention,
            resolution_note: None,
            retry_metadata_id: None,
            resolved_at: None,
        };
        inner.dead_letters.insert(dead_letter.id, dead_letter.clone());
        Ok(dead_letter)
    }

    async fn acknowledge_dead_letter(
        &self,
        id: Uuid,
        resolution_note: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let dl = inner
            .dead_letters
            .get_mut(&id)
            .ok_or(StoreError::DeadLetterNotFound(id))?;
        dl.status = DeadLetterStatus::Acknowledged;
        dl.resolution_note = resolution_note.map(str::to_string);
        dl.resolved_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_dead_letter_retried(
        &self,
        id: Uuid,
        retry_metadata_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let dl = inner
            .dead_letters
            .get_mut(&id)
            .ok_or(StoreError::DeadLetterNotFound(id))?;
        dl.status = DeadLetterStatus::Retried;
        dl.retry_metadata_id = Some(retry_metadata_id);
        dl.resolved_at = Some(Utc::now());
        Ok(())
    }

    async fn get_dead_letter(&self, id: Uuid) -> Result<DeadLetter, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .dead_letters
            .get(&id)
            .cloned()
            .ok_or(StoreError::DeadLetterNotFound(id))
    }

    async fn list_dead_letters_for_manifest(
        &self,
        manifest_id: Uuid,
    ) -> Result<Vec<DeadLetter>, StoreError> {
        let mut rows: Vec<DeadLetter> = self
            .inner
            .lock()
            .unwrap()
            .dead_letters
            .values()
            .filter(|dl| dl.manifest_id == manifest_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows)
    }

    async fn insert_background_job(
        &self,
        payload: serde_json::Value,
    ) -> Result<BackgroundJob, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = BackgroundJob {
            id: Uuid::now_v7(),
            payload,
            fetched_at: None,
            available_at: Utc::now(),
        };
        inner.background_jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn delete_background_job(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.lock().unwrap().background_jobs.remove(&id);
        Ok(())
    }
}

fn resolve_or_create_group(inner: &mut Inner, name: &str) -> Uuid {
    if let Some(&id) = inner.group_by_name.get(name) {
        return id;
    }
    let now = Utc::now();
    let group = ManifestGroup {
        id: Uuid::now_v7(),
        name: name.to_string(),
        priority: 16,
        max_active_jobs: None,
        is_enabled: true,
        created_at: now,
        updated_at: now,
    };
    inner.group_by_name.insert(name.to_string(), group.id);
    let id = group.id;
    inner.groups.insert(id, group);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
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
    async fn upsert_is_idempotent_by_external_id() {
        let store = InMemoryStore::new();
        let a = store.upsert_manifest(manifest_input("job-1")).await.unwrap();
        let b = store.upsert_manifest(manifest_input("job-1")).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn upsert_preserves_last_successful_run() {
        let store = InMemoryStore::new();
        let manifest = store.upsert_manifest(manifest_input("job-1")).await.unwrap();
        let now = Utc::now();
        store.mark_manifest_succeeded(manifest.id, now).await.unwrap();

        let updated = store.upsert_manifest(manifest_input("job-1")).await.unwrap();
        assert_eq!(updated.last_successful_run, Some(now));
    }

    #[tokio::test]
    async fn batch_upsert_and_prune_removes_unlisted_prefixed_manifests() {
        let store = InMemoryStore::new();
        store
            .batch_upsert_and_prune(
                vec![
                    manifest_input("sync-a"),
                    manifest_input("sync-b"),
                    manifest_input("sync-c"),
                ],
                Some("sync-"),
            )
            .await
            .unwrap();

        store
            .batch_upsert_and_prune(
                vec![manifest_input("sync-a"), manifest_input("sync-c")],
                Some("sync-"),
            )
            .await
            .unwrap();

        assert!(store
            .get_manifest_by_external_id("sync-a")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_manifest_by_external_id("sync-b")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_manifest_by_external_id("sync-c")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn transition_metadata_rejects_mismatched_from_state() {
        let store = InMemoryStore::new();
        let metadata = store
            .create_metadata(None, "TestWorkflow", serde_json::json!({}), None, 0)
            .await
            .unwrap();

        let err = store
            .transition_metadata(
                metadata.id,
                MetadataState::InProgress,
                MetadataState::Completed,
                None,
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StoreConflict { .. }));
    }

    #[tokio::test]
    async fn claim_next_work_queue_respects_global_cap() {
        let store = InMemoryStore::new();
        for i in 0..3 {
            store
                .enqueue_work(NewWorkQueueEntry {
                    external_id: format!("wq-{i}"),
                    workflow_name: "TestWorkflow".to_string(),
                    input: serde_json::json!({}),
                    input_type_name: "TestWorkflow".to_string(),
                    manifest_id: None,
                    priority: 16,
                    retry_count: 0,
                })
                .await
                .unwrap();
        }

        let admitted = store
            .claim_next_work_queue(
                AdmissionParams {
                    limit: 10,
                    global_cap: crate::store::GroupCap::Bounded(2),
                    dependent_boost: 0,
                },
                &[],
            )
            .await
            .unwrap();
        assert_eq!(admitted.len(), 2);
    }

    #[tokio::test]
    async fn list_due_manifests_excludes_cron_manifest_not_yet_due() {
        let store = InMemoryStore::new();
        let mut input = manifest_input("nightly");
        input.schedule_type = ScheduleTypeTag::Cron;
        input.cron_expression = Some("0 0 0 1 1 * 2999".to_string());
        let manifest = store.upsert_manifest(input).await.unwrap();

        let due = store.list_due_manifests(Utc::now()).await.unwrap();
        assert!(due.iter().all(|m| m.id != manifest.id));
    }

    #[tokio::test]
    async fn list_dead_letters_for_manifest_returns_only_matching_rows() {
        let store = InMemoryStore::new();
        let a = store.upsert_manifest(manifest_input("a")).await.unwrap();
        let b = store.upsert_manifest(manifest_input("b")).await.unwrap();
        store.create_dead_letter(a.id, "boom", 3).await.unwrap();
        store.create_dead_letter(b.id, "boom", 3).await.unwrap();

        let rows = store.list_dead_letters_for_manifest(a.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].manifest_id, a.id);
    }
}
