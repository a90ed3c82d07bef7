//! Postgres-backed [`JobStore`].

use async_trait::async_trait;
use labelbench_core::summary::JobSummary;
use labelbench_core::types::JobId;
use uuid::Uuid;

use crate::models::job::{JobPatch, JobRecord, NewJob};
use crate::models::status::JobStatus;
use crate::models::unit::{NewUnitRecord, UnitRecord};
use crate::repositories::{JobRepo, SummaryRepo, UnitResultRepo};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{JobStore, StoreError, UpdateOutcome};
use crate::DbPool;

/// Wraps the repositories with the contention retry discipline.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
    retry: RetryPolicy,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self::with_policy(pool, RetryPolicy::default())
    }

    pub fn with_policy(pool: DbPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        with_retry(&self.retry, "jobs.create", || JobRepo::create(&self.pool, &job)).await
    }

    async fn create_batch(&self, jobs: Vec<NewJob>) -> Result<Vec<JobRecord>, StoreError> {
        with_retry(&self.retry, "jobs.create_batch", || {
            JobRepo::create_many(&self.pool, &jobs)
        })
        .await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        with_retry(&self.retry, "jobs.get", || JobRepo::find_by_id(&self.pool, id)).await
    }

    async fn update(&self, id: JobId, patch: &JobPatch) -> Result<UpdateOutcome, StoreError> {
        let updated =
            with_retry(&self.retry, "jobs.update", || JobRepo::update(&self.pool, id, patch))
                .await?;
        if let Some(job) = updated {
            return Ok(UpdateOutcome::Applied(job));
        }

        // No row matched: either missing or already terminal.
        match self.get(id).await? {
            Some(job) => Ok(UpdateOutcome::Unchanged(job)),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn list(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        with_retry(&self.retry, "jobs.list", || JobRepo::list_recent(&self.pool, limit)).await
    }

    async fn pending_jobs(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        with_retry(&self.retry, "jobs.pending", || {
            JobRepo::list_by_status(&self.pool, JobStatus::Pending, limit)
        })
        .await
    }

    async fn running_jobs(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        with_retry(&self.retry, "jobs.running", || {
            JobRepo::list_by_status(&self.pool, JobStatus::Running, limit)
        })
        .await
    }

    async fn batch_members(&self, batch_id: Uuid) -> Result<Vec<JobRecord>, StoreError> {
        with_retry(&self.retry, "jobs.batch_members", || {
            JobRepo::list_batch(&self.pool, batch_id)
        })
        .await
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        with_retry(&self.retry, "jobs.delete", || JobRepo::delete(&self.pool, id)).await
    }

    async fn record_unit(&self, unit: &NewUnitRecord) -> Result<(), StoreError> {
        with_retry(&self.retry, "units.record", || UnitResultRepo::upsert(&self.pool, unit)).await
    }

    async fn unit_results(&self, id: JobId) -> Result<Vec<UnitRecord>, StoreError> {
        with_retry(&self.retry, "units.list", || UnitResultRepo::list_for_job(&self.pool, id))
            .await
    }

    async fn save_summary(&self, id: JobId, summary: &JobSummary) -> Result<(), StoreError> {
        with_retry(&self.retry, "summaries.save", || {
            SummaryRepo::upsert(&self.pool, id, summary)
        })
        .await
    }

    async fn summary(&self, id: JobId) -> Result<Option<JobSummary>, StoreError> {
        let row = with_retry(&self.retry, "summaries.get", || SummaryRepo::find(&self.pool, id))
            .await?;
        Ok(row.map(JobSummary::from))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        with_retry(&self.retry, "health", || crate::health_check(&self.pool)).await
    }
}
