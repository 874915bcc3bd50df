//! The `TaskServer` contract: enqueue, claim, complete, recover. One
//! `background_job` row per in-flight unit of work; claim is a single
//! `UPDATE … WHERE id = (SELECT … FOR UPDATE SKIP LOCKED)` statement so
//! concurrent workers never contend on the same row.

use std::time::Duration;

use async_trait::async_trait;
use coordinator_types::BackgroundJob;
use uuid::Uuid;

use crate::error::TaskServerError;

#[async_trait]
pub trait TaskServer: Send + Sync + 'static {
    /// `INSERT INTO background_job(payload, fetched_at=NULL, available_at=now())`.
    async fn enqueue(&self, payload: serde_json::Value) -> Result<Uuid, TaskServerError>;

    /// Claim the oldest available job whose visibility timeout has expired
    /// (or was never claimed). Returns `None` if nothing is claimable.
    async fn claim(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<BackgroundJob>, TaskServerError>;

    /// Both success and failure delete the row — the audit trail lives in
    /// `metadata`/`dead_letter`, not here.
    async fn complete(&self, job_id: Uuid) -> Result<(), TaskServerError>;
}
