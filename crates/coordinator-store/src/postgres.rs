//! PostgreSQL implementation of [`Store`].
//!
//! Uses a connection pool; every multi-row write runs inside a transaction.
//! Row-contention operations (`claim_next_work_queue`, the batch upsert)
//! use `SELECT … FOR UPDATE SKIP LOCKED` so that horizontally scaled
//! replicas don't block on each other.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coordinator_types::{
    is_due, BackgroundJob, DeadLetter, DeadLetterStatus, Manifest, ManifestGroup, Metadata,
    MetadataState, ScheduleTypeTag, WorkQueueEntry, WorkQueueStatus,
};
use sqlx::{PgPool, Row};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::dispatch::{admit, sort_candidates, Candidate};
use crate::error::StoreError;
use crate::store::{AdmissionParams, GroupCap, NewWorkQueueEntry, Store, UpsertManifestInput};

/// PostgreSQL-backed `Store`. Cheap to clone (wraps a pool handle).
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn manifest_from_row(row: &sqlx::postgres::PgRow) -> Result<Manifest, StoreError> {
    let schedule_type_str: String = row.try_get("schedule_type")?;
    Ok(Manifest {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        workflow_type_name: row.try_get("workflow_type_name")?,
        input: row.try_get("input")?,
        schedule_type: ScheduleTypeTag::from_db_str(&schedule_type_str)
            .ok_or_else(|| StoreError::Database(format!("unknown schedule_type `{schedule_type_str}`")))?,
        cron_expression: row.try_get("cron_expression")?,
        interval_seconds: row.try_get("interval_seconds")?,
        is_enabled: row.try_get("is_enabled")?,
        is_dormant: row.try_get("is_dormant")?,
        max_retries: row.try_get("max_retries")?,
        timeout_seconds: row.try_get("timeout_seconds")?,
        priority: row.try_get("priority")?,
        manifest_group_id: row.try_get("manifest_group_id")?,
        parent_manifest_id: row.try_get("parent_manifest_id")?,
        last_successful_run: row.try_get("last_successful_run")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn manifest_group_from_row(row: &sqlx::postgres::PgRow) -> Result<ManifestGroup, StoreError> {
    Ok(ManifestGroup {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        priority: row.try_get("priority")?,
        max_active_jobs: row.try_get("max_active_jobs")?,
        is_enabled: row.try_get("is_enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn metadata_from_row(row: &sqlx::postgres::PgRow) -> Result<Metadata, StoreError> {
    let state_str: String = row.try_get("state")?;
    Ok(Metadata {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        manifest_id: row.try_get("manifest_id")?,
        workflow_name: row.try_get("workflow_name")?,
        input: row.try_get("input")?,
        output: row.try_get("output")?,
        state: MetadataState::from_db_str(&state_str)
            .ok_or_else(|| StoreError::Database(format!("unknown metadata state `{state_str}`")))?,
        scheduled_time: row.try_get("scheduled_time")?,
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        retry_count: row.try_get("retry_count")?,
        currently_running_step: row.try_get("currently_running_step")?,
        cancellation_requested: row.try_get("cancellation_requested")?,
    })
}

fn work_queue_from_row(row: &sqlx::postgres::PgRow) -> Result<WorkQueueEntry, StoreError> {
    let status_str: String = row.try_get("status")?;
    Ok(WorkQueueEntry {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        workflow_name: row.try_get("workflow_name")?,
        input: row.try_get("input")?,
        input_type_name: row.try_get("input_type_name")?,
        manifest_id: row.try_get("manifest_id")?,
        metadata_id: row.try_get("metadata_id")?,
        priority: row.try_get("priority")?,
        status: WorkQueueStatus::from_db_str(&status_str)
            .ok_or_else(|| StoreError::Database(format!("unknown work_queue status `{status_str}`")))?,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
        dispatched_at: row.try_get("dispatched_at")?,
    })
}

fn dead_letter_from_row(row: &sqlx::postgres::PgRow) -> Result<DeadLetter, StoreError> {
    let status_str: String = row.try_get("status")?;
    Ok(DeadLetter {
        id: row.try_get("id")?,
        manifest_id: row.try_get("manifest_id")?,
        reason: row.try_get("reason")?,
        retry_count_at_dead_letter: row.try_get("retry_count_at_dead_letter")?,
        status: DeadLetterStatus::from_db_str(&status_str)
            .ok_or_else(|| StoreError::Database(format!("unknown dead_letter status `{status_str}`")))?,
        resolution_note: row.try_get("resolution_note")?,
        retry_metadata_id: row.try_get("retry_metadata_id")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self))]
    async fn upsert_manifest_group(
        &self,
        name: &str,
        priority: i16,
        max_active_jobs: Option<i32>,
    ) -> Result<ManifestGroup, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO manifest_group (id, name, priority, max_active_jobs, is_enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, true, now(), now())
            ON CONFLICT (name) DO UPDATE
                SET priority = EXCLUDED.priority,
                    max_active_jobs = EXCLUDED.max_active_jobs,
                    updated_at = now()
            RETURNING id, name, priority, max_active_jobs, is_enabled, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(name)
        .bind(priority)
        .bind(max_active_jobs)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to upsert manifest group {name}: {e}");
            StoreError::from(e)
        })?;

        Ok(ManifestGroup {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            priority: row.try_get("priority")?,
            max_active_jobs: row.try_get("max_active_jobs")?,
            is_enabled: row.try_get("is_enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    #[instrument(skip(self))]
    async fn get_manifest_group(&self, id: Uuid) -> Result<ManifestGroup, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, priority, max_active_jobs, is_enabled, created_at, updated_at FROM manifest_group WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::ManifestGroupNotFound(id))?;

        Ok(ManifestGroup {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            priority: row.try_get("priority")?,
            max_active_jobs: row.try_get("max_active_jobs")?,
            is_enabled: row.try_get("is_enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    #[instrument(skip(self))]
    async fn prune_orphan_groups(&self) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM manifest_group
            WHERE id NOT IN (SELECT DISTINCT manifest_group_id FROM manifest)
            RETURNING id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to prune orphan manifest groups: {e}");
            StoreError::from(e)
        })?;

        rows.iter().map(|r| r.try_get("id").map_err(StoreError::from)).collect()
    }

    #[instrument(skip(self))]
    async fn list_manifest_groups(&self) -> Result<Vec<ManifestGroup>, StoreError> {
        let rows = sqlx::query("SELECT * FROM manifest_group")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("failed to list manifest groups: {e}");
                StoreError::from(e)
            })?;
        rows.iter().map(manifest_group_from_row).collect()
    }

    #[instrument(skip(self, input), fields(external_id = %input.external_id))]
    async fn upsert_manifest(&self, input: UpsertManifestInput) -> Result<Manifest, StoreError> {
        let mut tx = self.pool.begin().await?;
        let manifest = upsert_manifest_tx(&mut tx, &input).await?;
        tx.commit().await?;
        Ok(manifest)
    }

    #[instrument(skip(self, items))]
    async fn batch_upsert_and_prune(
        &self,
        items: Vec<UpsertManifestInput>,
        prune_prefix: Option<&str>,
    ) -> Result<Vec<Manifest>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut upserted = Vec::with_capacity(items.len());
        for item in &items {
            upserted.push(upsert_manifest_tx(&mut tx, item).await?);
        }

        if let Some(prefix) = prune_prefix {
            let kept_ids: Vec<Uuid> = upserted.iter().map(|m| m.id).collect();
            sqlx::query(
                r#"
                DELETE FROM manifest
                WHERE external_id LIKE $1 || '%'
                  AND NOT (id = ANY($2))
                "#,
            )
            .bind(prefix)
            .bind(&kept_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("failed to prune manifests with prefix {prefix}: {e}");
                StoreError::from(e)
            })?;
        }

        tx.commit().await?;
        Ok(upserted)
    }

    #[instrument(skip(self))]
    async fn get_manifest(&self, id: Uuid) -> Result<Manifest, StoreError> {
        let row = sqlx::query("SELECT * FROM manifest WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::ManifestNotFound(id))?;
        manifest_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_manifest_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Manifest>, StoreError> {
        let row = sqlx::query("SELECT * FROM manifest WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(manifest_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_manifests(&self) -> Result<Vec<Manifest>, StoreError> {
        let rows = sqlx::query("SELECT * FROM manifest")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("failed to list manifests: {e}");
                StoreError::from(e)
            })?;
        rows.iter().map(manifest_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn set_manifest_enabled(&self, id: Uuid, enabled: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE manifest SET is_enabled = $1, updated_at = now() WHERE id = $2")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::ManifestNotFound(id));
        }
        Ok(())
    }

    /// Pulls every manifest with a schedule kind that could possibly be due
    /// and evaluates actual due-ness (cron occurrence, interval elapsed,
    /// parent advancement) in Rust via [`coordinator_types::is_due`], so the
    /// due-check logic is identical between this backend and `InMemoryStore`
    /// instead of re-approximated in SQL.
    #[instrument(skip(self))]
    async fn list_due_manifests(&self, now: DateTime<Utc>) -> Result<Vec<Manifest>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT m.* FROM manifest m
            JOIN manifest_group g ON g.id = m.manifest_group_id
            WHERE m.is_enabled AND g.is_enabled
              AND m.schedule_type IN ('interval', 'cron', 'dependent')
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to list due manifests: {e}");
            StoreError::from(e)
        })?;
        let candidates = rows.iter().map(manifest_from_row).collect::<Result<Vec<_>, _>>()?;

        let parent_ids: Vec<Uuid> = candidates
            .iter()
            .filter_map(|m| m.parent_manifest_id)
            .collect();
        let parent_runs: HashMap<Uuid, Option<DateTime<Utc>>> = if parent_ids.is_empty() {
            HashMap::new()
        } else {
            let parent_rows = sqlx::query("SELECT id, last_successful_run FROM manifest WHERE id = ANY($1)")
                .bind(&parent_ids)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    error!("failed to fetch parent manifests for due check: {e}");
                    StoreError::from(e)
                })?;
            parent_rows
                .iter()
                .map(|row| -> Result<(Uuid, Option<DateTime<Utc>>), StoreError> {
                    Ok((row.try_get("id")?, row.try_get("last_successful_run")?))
                })
                .collect::<Result<_, StoreError>>()?
        };

        Ok(candidates
            .into_iter()
            .filter(|m| {
                let parent_last_successful_run = m
                    .parent_manifest_id
                    .and_then(|pid| parent_runs.get(&pid).copied().flatten());
                is_due(m, now, parent_last_successful_run)
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn mark_manifest_succeeded(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE manifest SET last_successful_run = $1, updated_at = now() WHERE id = $2",
        )
        .bind(ended_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn count_active_jobs(
        &self,
        excluded_workflow_types: &[String],
        group_id: Option<Uuid>,
    ) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS active
            FROM metadata md
            LEFT JOIN manifest m ON m.id = md.manifest_id
            WHERE md.state IN ('pending', 'in_progress')
              AND NOT (md.workflow_name = ANY($1))
              AND ($2::uuid IS NULL OR m.manifest_group_id = $2)
            "#,
        )
        .bind(excluded_workflow_types)
        .bind(group_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to count active jobs: {e}");
            StoreError::from(e)
        })?;
        let count: i64 = row.try_get("active")?;
        Ok(count as u32)
    }

    #[instrument(skip(self, input))]
    async fn create_metadata(
        &self,
        manifest_id: Option<Uuid>,
        workflow_name: &str,
        input: serde_json::Value,
        scheduled_time: Option<DateTime<Utc>>,
        retry_count: i32,
    ) -> Result<Metadata, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO metadata (id, external_id, manifest_id, workflow_name, input, state, scheduled_time, retry_count, cancellation_requested)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, false)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(Uuid::now_v7().to_string())
        .bind(manifest_id)
        .bind(workflow_name)
        .bind(input)
        .bind(scheduled_time)
        .bind(retry_count)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to create metadata for {workflow_name}: {e}");
            StoreError::from(e)
        })?;
        metadata_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn get_metadata(&self, id: Uuid) -> Result<Metadata, StoreError> {
        let row = sqlx::query("SELECT * FROM metadata WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::MetadataNotFound(id))?;
        metadata_from_row(&row)
    }

    #[instrument(skip(self, output))]
    async fn transition_metadata(
        &self,
        id: Uuid,
        from: MetadataState,
        to: MetadataState,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
        output: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE metadata
            SET state = $1,
                started_at = COALESCE($2, started_at),
                ended_at = COALESCE($3, ended_at),
                output = COALESCE($4, output)
            WHERE id = $5 AND state = $6
            "#,
        )
        .bind(to.as_db_str())
        .bind(started_at)
        .bind(ended_at)
        .bind(output)
        .bind(id)
        .bind(from.as_db_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual = self.get_metadata(id).await?.state;
            return Err(StoreError::StoreConflict {
                entity: "metadata",
                expected: format!("{from:?}"),
                actual: format!("{actual:?}"),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn increment_retry_count(&self, id: Uuid) -> Result<i32, StoreError> {
        let row = sqlx::query(
            "UPDATE metadata SET retry_count = retry_count + 1 WHERE id = $1 RETURNING retry_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::MetadataNotFound(id))?;
        Ok(row.try_get("retry_count")?)
    }

    #[instrument(skip(self))]
    async fn request_cancellation(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE metadata SET cancellation_requested = true WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MetadataNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_in_progress_metadata(&self) -> Result<Vec<Metadata>, StoreError> {
        let rows = sqlx::query("SELECT * FROM metadata WHERE state = 'in_progress'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(metadata_from_row).collect()
    }

    #[instrument(skip(self, whitelist))]
    async fn purge_terminal_metadata(
        &self,
        whitelist: &[String],
        older_than: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM metadata
            WHERE state IN ('completed', 'failed', 'cancelled')
              AND ended_at < $1
              AND workflow_name = ANY($2)
            "#,
        )
        .bind(older_than)
        .bind(whitelist)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to purge terminal metadata: {e}");
            StoreError::from(e)
        })?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, entry))]
    async fn enqueue_work(&self, entry: NewWorkQueueEntry) -> Result<WorkQueueEntry, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO work_queue (id, external_id, workflow_name, input, input_type_name, manifest_id, priority, retry_count, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'queued', now())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&entry.external_id)
        .bind(&entry.workflow_name)
        .bind(&entry.input)
        .bind(&entry.input_type_name)
        .bind(entry.manifest_id)
        .bind(entry.priority)
        .bind(entry.retry_count)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to enqueue work queue entry {}: {e}", entry.external_id);
            StoreError::from(e)
        })?;
        work_queue_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn has_queued_entry_for_manifest(&self, manifest_id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM work_queue WHERE manifest_id = $1 AND status = 'queued') AS exists",
        )
        .bind(manifest_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("exists")?)
    }

    /// Candidate set pulled with `FOR UPDATE SKIP LOCKED` so that multiple
    /// `JobDispatcher` replicas running this query concurrently don't block
    /// each other; the admission algebra then runs in-process over the
    /// locked rows before the transaction commits.
    #[instrument(skip(self, group_caps))]
    async fn claim_next_work_queue(
        &self,
        params: AdmissionParams,
        group_caps: &[(Uuid, GroupCap)],
    ) -> Result<Vec<WorkQueueEntry>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT wq.id, wq.priority, wq.created_at,
                   COALESCE(m.manifest_group_id, '00000000-0000-0000-0000-000000000000'::uuid) AS group_id,
                   COALESCE(m.schedule_type = 'dependent', false) AS is_dependent
            FROM work_queue wq
            LEFT JOIN manifest m ON m.id = wq.manifest_id
            LEFT JOIN manifest_group g ON g.id = m.manifest_group_id
            WHERE wq.status = 'queued'
              AND (m.id IS NULL OR m.is_enabled)
              AND (g.id IS NULL OR g.is_enabled)
            ORDER BY wq.priority DESC, wq.created_at
            LIMIT $1
            FOR UPDATE OF wq SKIP LOCKED
            "#,
        )
        .bind(params.limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            error!("failed to select claimable work queue rows: {e}");
            StoreError::from(e)
        })?;

        let mut candidates: Vec<Candidate> = rows
            .iter()
            .map(|row| {
                Ok(Candidate {
                    id: row.try_get("id")?,
                    group_id: row.try_get("group_id")?,
                    priority: row.try_get("priority")?,
                    is_dependent: row.try_get("is_dependent")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        sort_candidates(&mut candidates, params.dependent_boost);

        let group_cap_map: HashMap<Uuid, GroupCap> = group_caps.iter().cloned().collect();
        let admitted_ids = admit(
            &candidates,
            params.global_cap,
            &group_cap_map,
            0,
            HashMap::new(),
        );

        if admitted_ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let updated = sqlx::query(
            r#"
            UPDATE work_queue
            SET status = 'dispatched', dispatched_at = now()
            WHERE id = ANY($1)
            RETURNING *
            "#,
        )
        .bind(&admitted_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            error!("failed to dispatch admitted work queue rows: {e}");
            StoreError::from(e)
        })?;

        tx.commit().await?;
        updated.iter().map(work_queue_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn attach_metadata_to_work_queue(
        &self,
        work_queue_id: Uuid,
        metadata_id: Uuid,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE work_queue SET metadata_id = $1 WHERE id = $2")
            .bind(metadata_id)
            .bind(work_queue_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("failed to attach metadata to work queue entry: {e}");
                StoreError::from(e)
            })?;
        Ok(())
    }

    #[instrument(skip(self, reason))]
    async fn create_dead_letter(
        &self,
        manifest_id: Uuid,
        reason: &str,
        retry_count_at_dead_letter: i32,
    ) -> Result<DeadLetter, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO dead_letter (id, manifest_id, reason, retry_count_at_dead_letter, status)
            VALUES ($1, $2, $3, $4, 'awaiting_intervention')
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(manifest_id)
        .bind(reason)
        .bind(retry_count_at_dead_letter)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to create dead letter for manifest {manifest_id}: {e}");
            StoreError::from(e)
        })?;
        dead_letter_from_row(&row)
    }

    #[instrument(skip(self, resolution_note))]
    async fn acknowledge_dead_letter(
        &self,
        id: Uuid,
        resolution_note: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE dead_letter SET status = 'acknowledged', resolution_note = $1, resolved_at = now() WHERE id = $2",
        )
        .bind(resolution_note)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DeadLetterNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_dead_letter_retried(
        &self,
        id: Uuid,
        retry_metadata_id: Uuid,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE dead_letter SET status = 'retried', retry_metadata_id = $1, resolved_at = now() WHERE id = $2",
        )
        .bind(retry_metadata_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::DeadLetterNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_dead_letter(&self, id: Uuid) -> Result<DeadLetter, StoreError> {
        let row = sqlx::query("SELECT * FROM dead_letter WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::DeadLetterNotFound(id))?;
        dead_letter_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn list_dead_letters_for_manifest(
        &self,
        manifest_id: Uuid,
    ) -> Result<Vec<DeadLetter>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM dead_letter WHERE manifest_id = $1 ORDER BY id DESC",
        )
        .bind(manifest_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to list dead letters for manifest {manifest_id}: {e}");
            StoreError::from(e)
        })?;
        rows.iter().map(dead_letter_from_row).collect()
    }

    #[instrument(skip(self, payload))]
    async fn insert_background_job(
        &self,
        payload: serde_json::Value,
    ) -> Result<BackgroundJob, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO background_job (id, payload, fetched_at, available_at)
            VALUES ($1, $2, NULL, now())
            RETURNING id, payload, fetched_at, available_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to insert background job: {e}");
            StoreError::from(e)
        })?;

        Ok(BackgroundJob {
            id: row.try_get("id")?,
            payload: row.try_get("payload")?,
            fetched_at: row.try_get("fetched_at")?,
            available_at: row.try_get("available_at")?,
        })
    }

    #[instrument(skip(self))]
    async fn delete_background_job(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM background_job WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn upsert_manifest_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    input: &UpsertManifestInput,
) -> Result<Manifest, StoreError> {
    let group_row = sqlx::query(
        r#"
        INSERT INTO manifest_group (id, name, priority, is_enabled, created_at, updated_at)
        VALUES ($1, $2, 16, true, now(), now())
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(&input.manifest_group_name)
    .fetch_one(&mut **tx)
    .await?;
    let group_id: Uuid = group_row.try_get("id")?;

    let parent_id = match &input.parent_external_id {
        Some(parent_external_id) => {
            let row = sqlx::query("SELECT id FROM manifest WHERE external_id = $1")
                .bind(parent_external_id)
                .fetch_optional(&mut **tx)
                .await?
                .ok_or_else(|| StoreError::MissingParent(parent_external_id.clone()))?;
            Some(row.try_get::<Uuid, _>("id")?)
        }
        None => None,
    };

    let row = sqlx::query(
        r#"
        INSERT INTO manifest (
            id, external_id, workflow_type_name, input, schedule_type, cron_expression,
            interval_seconds, is_enabled, is_dormant, max_retries, timeout_seconds, priority,
            manifest_group_id, parent_manifest_id, last_successful_run, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NULL, now(), now())
        ON CONFLICT (external_id) DO UPDATE SET
            workflow_type_name = EXCLUDED.workflow_type_name,
            input = EXCLUDED.input,
            schedule_type = EXCLUDED.schedule_type,
            cron_expression = EXCLUDED.cron_expression,
            interval_seconds = EXCLUDED.interval_seconds,
            is_enabled = EXCLUDED.is_enabled,
            is_dormant = EXCLUDED.is_dormant,
            max_retries = EXCLUDED.max_retries,
            timeout_seconds = EXCLUDED.timeout_seconds,
            priority = EXCLUDED.priority,
            manifest_group_id = EXCLUDED.manifest_group_id,
            parent_manifest_id = EXCLUDED.parent_manifest_id,
            updated_at = now()
        RETURNING *
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(&input.external_id)
    .bind(&input.workflow_type_name)
    .bind(&input.input)
    .bind(input.schedule_type.as_db_str())
    .bind(&input.cron_expression)
    .bind(input.interval_seconds)
    .bind(input.is_enabled)
    .bind(input.is_dormant)
    .bind(input.max_retries)
    .bind(input.timeout_seconds)
    .bind(input.priority)
    .bind(group_id)
    .bind(parent_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        error!("failed to upsert manifest {}: {e}", input.external_id);
        StoreError::from(e)
    })?;

    manifest_from_row(&row)
}
