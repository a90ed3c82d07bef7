//! Repository for the `inference_jobs` table.

use labelbench_core::types::{new_job_id, JobId};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::job::{JobPatch, JobRecord, NewJob};
use crate::models::status::{JobStatus, TERMINAL_STATUS_IDS};

/// Column list for `inference_jobs` queries.
const COLUMNS: &str = "\
    id, engine, dataset_ref, variant, batch_id, status_id, \
    total_units, processed_units, error_message, \
    created_at, started_at, completed_at, last_progress_at, updated_at";

pub struct JobRepo;

impl JobRepo {
    /// Insert a pending job.
    pub async fn create(pool: &PgPool, input: &NewJob) -> Result<JobRecord, sqlx::Error> {
        Self::insert(pool, new_job_id(), input).await
    }

    /// Insert several jobs in one transaction so a batch is never half
    /// visible to the dispatcher.
    pub async fn create_many(
        pool: &PgPool,
        inputs: &[NewJob],
    ) -> Result<Vec<JobRecord>, sqlx::Error> {
        let query = insert_query();
        let mut tx = pool.begin().await?;
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            let job = sqlx::query_as::<_, JobRecord>(&query)
                .bind(new_job_id())
                .bind(&input.engine)
                .bind(&input.dataset_ref)
                .bind(&input.variant)
                .bind(input.batch_id)
                .bind(JobStatus::Pending.id())
                .bind(input.total_units.max(0))
                .fetch_one(&mut *tx)
                .await?;
            created.push(job);
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn insert(pool: &PgPool, id: JobId, input: &NewJob) -> Result<JobRecord, sqlx::Error> {
        sqlx::query_as::<_, JobRecord>(&insert_query())
            .bind(id)
            .bind(&input.engine)
            .bind(&input.dataset_ref)
            .bind(&input.variant)
            .bind(input.batch_id)
            .bind(JobStatus::Pending.id())
            .bind(input.total_units.max(0))
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<JobRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM inference_jobs WHERE id = $1");
        sqlx::query_as::<_, JobRecord>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Merge a patch into a non-terminal row.
    ///
    /// Returns `None` when no row matched, either because the job does not
    /// exist or because it is already terminal.
    pub async fn update(
        pool: &PgPool,
        id: JobId,
        patch: &JobPatch,
    ) -> Result<Option<JobRecord>, sqlx::Error> {
        let query = format!(
            "UPDATE inference_jobs SET \
                 status_id = COALESCE($2, status_id), \
                 processed_units = CASE WHEN $3::INTEGER IS NULL THEN processed_units \
                     ELSE LEAST(GREATEST($3::INTEGER, 0), total_units) END, \
                 last_progress_at = CASE WHEN $3::INTEGER IS NULL THEN last_progress_at \
                     ELSE NOW() END, \
                 error_message = COALESCE($4, error_message), \
                 started_at = CASE WHEN $2 = $5 AND started_at IS NULL THEN NOW() \
                     ELSE started_at END, \
                 completed_at = CASE WHEN $2 = ANY($6) THEN NOW() ELSE completed_at END, \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id <> ALL($6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRecord>(&query)
            .bind(id)
            .bind(patch.status.map(JobStatus::id))
            .bind(patch.processed_units)
            .bind(patch.error_message.as_deref())
            .bind(JobStatus::Running.id())
            .bind(&TERMINAL_STATUS_IDS[..])
            .fetch_optional(pool)
            .await
    }

    /// Newest first.
    pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<JobRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM inference_jobs ORDER BY created_at DESC, id DESC LIMIT $1"
        );
        sqlx::query_as::<_, JobRecord>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Jobs in `status`, oldest first.
    pub async fn list_by_status(
        pool: &PgPool,
        status: JobStatus,
        limit: i64,
    ) -> Result<Vec<JobRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM inference_jobs WHERE status_id = $1 \
             ORDER BY created_at ASC, id ASC LIMIT $2"
        );
        sqlx::query_as::<_, JobRecord>(&query)
            .bind(status.id())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn list_batch(pool: &PgPool, batch_id: Uuid) -> Result<Vec<JobRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM inference_jobs WHERE batch_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, JobRecord>(&query)
            .bind(batch_id)
            .fetch_all(pool)
            .await
    }

    /// Delete a job; unit results and summary go with it via `ON DELETE CASCADE`.
    pub async fn delete(pool: &PgPool, id: JobId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM inference_jobs WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn insert_query() -> String {
    format!(
        "INSERT INTO inference_jobs \
             (id, engine, dataset_ref, variant, batch_id, status_id, total_units) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {COLUMNS}"
    )
}
