//! Postgres-backed `TaskServer`, using the exact claim statement from the
//! component design: a single `UPDATE … WHERE id = (SELECT … FOR UPDATE
//! SKIP LOCKED)`, so the row is never visible to a second claimant between
//! the subselect and the update.

use std::time::Duration;

use async_trait::async_trait;
use coordinator_types::BackgroundJob;
use sqlx::{PgPool, Row};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::error::TaskServerError;
use crate::server::TaskServer;

#[derive(Clone)]
pub struct PostgresTaskServer {
    pool: PgPool,
}

impl PostgresTaskServer {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskServer for PostgresTaskServer {
    #[instrument(skip(self, payload))]
    async fn enqueue(&self, payload: serde_json::Value) -> Result<Uuid, TaskServerError> {
        let row = sqlx::query(
            r#"
            INSERT INTO background_job (id, payload, fetched_at, available_at)
            VALUES ($1, $2, NULL, now())
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to enqueue background job: {e}");
            TaskServerError::from(e)
        })?;
        Ok(row.try_get("id")?)
    }

    #[instrument(skip(self))]
    async fn claim(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<BackgroundJob>, TaskServerError> {
        let visibility_seconds = visibility_timeout.as_secs() as f64;

        let row = sqlx::query(
            r#"
            UPDATE background_job
               SET fetched_at = now()
             WHERE id = (
               SELECT id FROM background_job
                WHERE fetched_at IS NULL
                   OR fetched_at < now() - ($1 || ' seconds')::interval
                ORDER BY available_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED)
             RETURNING id, payload, fetched_at, available_at
            "#,
        )
        .bind(visibility_seconds)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("failed to claim background job: {e}");
            TaskServerError::from(e)
        })?;

        row.map(|row| {
            Ok(BackgroundJob {
                id: row.try_get("id")?,
                payload: row.try_get("payload")?,
                fetched_at: row.try_get("fetched_at")?,
                available_at: row.try_get("available_at")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn complete(&self, job_id: Uuid) -> Result<(), TaskServerError> {
        sqlx::query("DELETE FROM background_job WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("failed to delete completed background job {job_id}: {e}");
                TaskServerError::from(e)
            })?;
        Ok(())
    }
}
