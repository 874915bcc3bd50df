//! The `Store` trait: durable CRUD and atomic operations over the six
//! persisted tables. Implementations must be `Send + Sync` and safe under
//! concurrent access from multiple replicas.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordinator_types::{
    BackgroundJob, DeadLetter, Manifest, ManifestGroup, Metadata, MetadataState, ScheduleTypeTag,
    WorkQueueEntry,
};
use uuid::Uuid;

use crate::error::StoreError;

/// Fields accepted by `upsert_manifest`. `external_id` is the upsert key;
/// all other fields are always applied on both insert and update except
/// `last_successful_run`, which is preserved across updates (invariant 1/6).
#[derive(Debug, Clone)]
pub struct UpsertManifestInput {
    pub external_id: String,
    pub workflow_type_name: String,
    pub input: serde_json::Value,
    pub schedule_type: ScheduleTypeTag,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i64>,
    pub is_enabled: bool,
    pub is_dormant: bool,
    pub max_retries: i32,
    pub timeout_seconds: Option<i64>,
    pub priority: i16,
    pub manifest_group_name: String,
    pub parent_external_id: Option<String>,
}

/// Per-group active-job cap, or unbounded.
#[derive(Debug, Clone, Copy)]
pub enum GroupCap {
    Bounded(u32),
    Unbounded,
}

impl GroupCap {
    pub fn allows(&self, active: u32) -> bool {
        match self {
            GroupCap::Bounded(max) => active < *max,
            GroupCap::Unbounded => true,
        }
    }
}

/// Admission parameters for `claim_next_work_queue`.
#[derive(Debug, Clone)]
pub struct AdmissionParams {
    pub limit: u32,
    pub global_cap: GroupCap,
    pub dependent_boost: i32,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // Manifest groups

    async fn upsert_manifest_group(
        &self,
        name: &str,
        priority: i16,
        max_active_jobs: Option<i32>,
    ) -> Result<ManifestGroup, StoreError>;

    async fn get_manifest_group(&self, id: Uuid) -> Result<ManifestGroup, StoreError>;

    async fn prune_orphan_groups(&self) -> Result<Vec<Uuid>, StoreError>;

    /// All manifest groups, for building per-group caps ahead of a
    /// `claim_next_work_queue` call.
    async fn list_manifest_groups(&self) -> Result<Vec<ManifestGroup>, StoreError>;

    // Manifests

    /// Insert-or-update on `external_id`; preserves `last_successful_run`
    /// and appends to the resolved group (invariant 1).
    async fn upsert_manifest(&self, input: UpsertManifestInput) -> Result<Manifest, StoreError>;

    /// Single transaction: upsert each item, then delete any manifest whose
    /// `external_id` starts with `prune_prefix` and is not in `items`,
    /// cascading to its dead-letter and work-queue rows.
    async fn batch_upsert_and_prune(
        &self,
        items: Vec<UpsertManifestInput>,
        prune_prefix: Option<&str>,
    ) -> Result<Vec<Manifest>, StoreError>;

    async fn get_manifest(&self, id: Uuid) -> Result<Manifest, StoreError>;

    async fn get_manifest_by_external_id(&self, external_id: &str)
        -> Result<Option<Manifest>, StoreError>;

    /// All manifests, for startup-time DAG cycle validation over the
    /// `parentRef`-projected group graph.
    async fn list_manifests(&self) -> Result<Vec<Manifest>, StoreError>;

    async fn set_manifest_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError>;

    /// Enabled manifests whose next fire time is due at `now`: Cron/Interval
    /// due by elapsed time since `last_successful_run`; Dependent due when
    /// the parent's `last_successful_run` has advanced past this manifest's.
    async fn list_due_manifests(&self, now: DateTime<Utc>) -> Result<Vec<Manifest>, StoreError>;

    async fn mark_manifest_succeeded(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // Metadata / active-jobs accounting

    async fn count_active_jobs(
        &self,
        excluded_workflow_types: &[String],
        group_id: Option<Uuid>,
    ) -> Result<u32, StoreError>;

    /// `retry_count` seeds the new row's counter from the work-queue entry
    /// that spawned it, so `increment_retry_count` keeps counting up across
    /// re-enqueues instead of restarting at zero on every retry.
    async fn create_metadata(
        &self,
        manifest_id: Option<Uuid>,
        workflow_name: &str,
        input: serde_json::Value,
        scheduled_time: Option<DateTime<Utc>>,
        retry_count: i32,
    ) -> Result<Metadata, StoreError>;

    async fn get_metadata(&self, id: Uuid) -> Result<Metadata, StoreError>;

    /// Compare-and-swap on `state`; fails with `StoreConflict` if the row's
    /// current state doesn't match `from`.
    async fn transition_metadata(
        &self,
        id: Uuid,
        from: MetadataState,
        to: MetadataState,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
        output: Option<serde_json::Value>,
    ) -> Result<(), StoreError>;

    async fn increment_retry_count(&self, id: Uuid) -> Result<i32, StoreError>;

    async fn request_cancellation(&self, id: Uuid) -> Result<(), StoreError>;

    /// `metadata.state = InProgress` rows, for startup recovery.
    async fn list_in_progress_metadata(&self) -> Result<Vec<Metadata>, StoreError>;

    /// Purge terminal metadata older than `older_than` whose workflow name
    /// is in `whitelist`.
    async fn purge_terminal_metadata(
        &self,
        whitelist: &[String],
        older_than: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    // Work queue

    async fn enqueue_work(&self, entry: NewWorkQueueEntry) -> Result<WorkQueueEntry, StoreError>;

    /// Whether a live (`Queued`) work-queue row already exists for this
    /// manifest, to avoid duplicate dispatch of the same due manifest.
    async fn has_queued_entry_for_manifest(&self, manifest_id: Uuid) -> Result<bool, StoreError>;

    /// Greedy admission over `Queued` rows: sorted by effective priority
    /// descending then `created_at` ascending, bounded by caps. Returns the
    /// admitted rows already flipped to `Dispatched` with `metadata_id`
    /// stamped, in one transaction per the dispatch algebra in §4.3.
    async fn claim_next_work_queue(
        &self,
        params: AdmissionParams,
        group_caps: &[(Uuid, GroupCap)],
    ) -> Result<Vec<WorkQueueEntry>, StoreError>;

    /// Stamps the `metadata` row created for a dispatched work-queue entry
    /// onto that row, so `TaskServerExecutor` can join the two.
    async fn attach_metadata_to_work_queue(
        &self,
        work_queue_id: Uuid,
        metadata_id: Uuid,
    ) -> Result<(), StoreError>;

    // Dead letters

    async fn create_dead_letter(
        &self,
        manifest_id: Uuid,
        reason: &str,
        retry_count_at_dead_letter: i32,
    ) -> Result<DeadLetter, StoreError>;

    async fn acknowledge_dead_letter(
        &self,
        id: Uuid,
        resolution_note: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn mark_dead_letter_retried(
        &self,
        id: Uuid,
        retry_metadata_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn get_dead_letter(&self, id: Uuid) -> Result<DeadLetter, StoreError>;

    /// Dead letters recorded against a manifest, newest first; lets callers
    /// (and tests) observe that an exhausted retry was actually routed to
    /// the dead-letter table rather than silently retried forever.
    async fn list_dead_letters_for_manifest(
        &self,
        manifest_id: Uuid,
    ) -> Result<Vec<DeadLetter>, StoreError>;

    // Background jobs (task server storage, see coordinator-taskserver)

    async fn insert_background_job(
        &self,
        payload: serde_json::Value,
    ) -> Result<BackgroundJob, StoreError>;

    async fn delete_background_job(&self, id: Uuid) -> Result<(), StoreError>;
}

/// A work-queue row not yet persisted; `status` always starts `Queued`.
#[derive(Debug, Clone)]
pub struct NewWorkQueueEntry {
    pub external_id: String,
    pub workflow_name: String,
    pub input: serde_json::Value,
    pub input_type_name: String,
    pub manifest_id: Option<Uuid>,
    pub priority: i16,
    /// Cumulative retry attempt carried forward into the `metadata` row
    /// `job_dispatcher` creates for this entry; `0` for a fresh run.
    pub retry_count: i32,
}
