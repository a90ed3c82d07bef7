//! The `JobStore` seam shared by the request layer, dispatcher, watchdogs
//! and worker processes.

use async_trait::async_trait;
use labelbench_core::summary::JobSummary;
use labelbench_core::types::JobId;
use uuid::Uuid;

use crate::models::job::{JobPatch, JobRecord, NewJob};
use crate::models::unit::{NewUnitRecord, UnitRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },
}

/// Result of [`JobStore::update`].
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// The patch was merged; carries the row after the write.
    Applied(JobRecord),
    /// The row was already terminal so nothing was written; carries the
    /// row as stored.
    Unchanged(JobRecord),
}

impl UpdateOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            UpdateOutcome::Applied(job) | UpdateOutcome::Unchanged(job) => job,
        }
    }

    pub fn into_record(self) -> JobRecord {
        match self {
            UpdateOutcome::Applied(job) | UpdateOutcome::Unchanged(job) => job,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }
}

/// Persistent job table.
///
/// Every implementation retries contention errors internally, so callers
/// only see [`StoreError::RetriesExhausted`] once the budget is spent.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending job.
    async fn create(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    /// Insert several pending jobs atomically, in order.
    async fn create_batch(&self, jobs: Vec<NewJob>) -> Result<Vec<JobRecord>, StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// Merge a patch into a non-terminal job.
    ///
    /// The first transition into running stamps `started_at`; entering a
    /// terminal status stamps `completed_at`; progress is clamped to
    /// `total_units` and stamps `last_progress_at`. Terminal rows are never
    /// modified and yield [`UpdateOutcome::Unchanged`].
    async fn update(&self, id: JobId, patch: &JobPatch) -> Result<UpdateOutcome, StoreError>;

    /// Most recent jobs first.
    async fn list(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError>;

    /// Pending jobs, oldest first.
    async fn pending_jobs(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError>;

    /// Running jobs, oldest first.
    async fn running_jobs(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError>;

    /// Every job sharing `batch_id`, in creation order.
    async fn batch_members(&self, batch_id: Uuid) -> Result<Vec<JobRecord>, StoreError>;

    /// Remove a job and its unit results and summary. Returns whether a row
    /// existed.
    async fn delete(&self, id: JobId) -> Result<bool, StoreError>;

    async fn record_unit(&self, unit: &NewUnitRecord) -> Result<(), StoreError>;

    /// Unit results ordered by unit index.
    async fn unit_results(&self, id: JobId) -> Result<Vec<UnitRecord>, StoreError>;

    async fn save_summary(&self, id: JobId, summary: &JobSummary) -> Result<(), StoreError>;

    async fn summary(&self, id: JobId) -> Result<Option<JobSummary>, StoreError>;

    /// Cheap connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
