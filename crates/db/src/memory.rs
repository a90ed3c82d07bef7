//! In-process [`JobStore`] for tests and local runs without Postgres.
//!
//! Follows the same merge rules as the SQL repositories and the same
//! [`with_retry`] discipline. [`MemoryJobStore::inject_transient_failures`]
//! makes the next calls fail with a pool timeout so retry behaviour can be
//! exercised without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use labelbench_core::summary::JobSummary;
use labelbench_core::types::{new_job_id, JobId};
use uuid::Uuid;

use crate::models::job::{JobPatch, JobRecord, NewJob};
use crate::models::status::JobStatus;
use crate::models::unit::{NewUnitRecord, UnitRecord};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{JobStore, StoreError, UpdateOutcome};

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, JobRecord>,
    /// Insertion order, oldest first.
    order: Vec<JobId>,
    units: HashMap<JobId, Vec<UnitRecord>>,
    summaries: HashMap<JobId, JobSummary>,
    next_unit_id: i64,
}

pub struct MemoryJobStore {
    tables: Mutex<Tables>,
    retry: RetryPolicy,
    pending_failures: AtomicU32,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::immediate(RetryPolicy::default().max_attempts))
    }

    pub fn with_policy(retry: RetryPolicy) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            retry,
            pending_failures: AtomicU32::new(0),
        }
    }

    /// Fail the next `count` attempts with [`sqlx::Error::PoolTimedOut`].
    pub fn inject_transient_failures(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Run `f` against the tables, consuming one injected failure first if
    /// any are pending.
    fn attempt<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, sqlx::Error> {
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(sqlx::Error::PoolTimedOut);
        }
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| sqlx::Error::Protocol("memory store lock poisoned".into()))?;
        Ok(f(&mut tables))
    }
}

fn insert(tables: &mut Tables, input: &NewJob) -> JobRecord {
    let now = Utc::now();
    let job = JobRecord {
        id: new_job_id(),
        engine: input.engine.clone(),
        dataset_ref: input.dataset_ref.clone(),
        variant: input.variant.clone(),
        batch_id: input.batch_id,
        status_id: JobStatus::Pending.id(),
        total_units: input.total_units.max(0),
        processed_units: 0,
        error_message: None,
        created_at: now,
        started_at: None,
        completed_at: None,
        last_progress_at: None,
        updated_at: now,
    };
    tables.order.push(job.id);
    tables.jobs.insert(job.id, job.clone());
    job
}

fn apply_patch(job: &mut JobRecord, patch: &JobPatch) {
    let now = Utc::now();
    if let Some(status) = patch.status {
        if status == JobStatus::Running && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if status.is_terminal() {
            job.completed_at = Some(now);
        }
        job.status_id = status.id();
    }
    if let Some(processed) = patch.processed_units {
        job.processed_units = processed.clamp(0, job.total_units);
        job.last_progress_at = Some(now);
    }
    if let Some(message) = &patch.error_message {
        job.error_message = Some(message.clone());
    }
    job.updated_at = now;
}

fn ordered<'a>(tables: &'a Tables) -> impl DoubleEndedIterator<Item = &'a JobRecord> + 'a {
    tables.order.iter().filter_map(|id| tables.jobs.get(id))
}

fn in_status(tables: &Tables, status: JobStatus, limit: i64) -> Vec<JobRecord> {
    ordered(tables)
        .filter(|job| job.status() == status)
        .take(usize::try_from(limit).unwrap_or(0))
        .cloned()
        .collect()
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        with_retry(&self.retry, "jobs.create", || {
            let result = self.attempt(|t| insert(t, &job));
            async move { result }
        })
        .await
    }

    async fn create_batch(&self, jobs: Vec<NewJob>) -> Result<Vec<JobRecord>, StoreError> {
        with_retry(&self.retry, "jobs.create_batch", || {
            let result = self.attempt(|t| jobs.iter().map(|job| insert(t, job)).collect());
            async move { result }
        })
        .await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        with_retry(&self.retry, "jobs.get", || {
            let result = self.attempt(|t| t.jobs.get(&id).cloned());
            async move { result }
        })
        .await
    }

    async fn update(&self, id: JobId, patch: &JobPatch) -> Result<UpdateOutcome, StoreError> {
        let outcome = with_retry(&self.retry, "jobs.update", || {
            let result = self.attempt(|t| {
                t.jobs.get_mut(&id).map(|job| {
                    if job.is_terminal() {
                        UpdateOutcome::Unchanged(job.clone())
                    } else {
                        apply_patch(job, patch);
                        UpdateOutcome::Applied(job.clone())
                    }
                })
            });
            async move { result }
        })
        .await?;
        outcome.ok_or(StoreError::NotFound(id))
    }

    async fn list(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        with_retry(&self.retry, "jobs.list", || {
            let result = self.attempt(|t| ordered(t).rev().take(limit).cloned().collect());
            async move { result }
        })
        .await
    }

    async fn pending_jobs(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        with_retry(&self.retry, "jobs.pending", || {
            let result = self.attempt(|t| in_status(t, JobStatus::Pending, limit));
            async move { result }
        })
        .await
    }

    async fn running_jobs(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        with_retry(&self.retry, "jobs.running", || {
            let result = self.attempt(|t| in_status(t, JobStatus::Running, limit));
            async move { result }
        })
        .await
    }

    async fn batch_members(&self, batch_id: Uuid) -> Result<Vec<JobRecord>, StoreError> {
        with_retry(&self.retry, "jobs.batch_members", || {
            let result = self.attempt(|t| {
                ordered(t)
                    .filter(|job| job.batch_id == Some(batch_id))
                    .cloned()
                    .collect()
            });
            async move { result }
        })
        .await
    }

    async fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        with_retry(&self.retry, "jobs.delete", || {
            let result = self.attempt(|t| {
                let existed = t.jobs.remove(&id).is_some();
                t.order.retain(|other| *other != id);
                t.units.remove(&id);
                t.summaries.remove(&id);
                existed
            });
            async move { result }
        })
        .await
    }

    async fn record_unit(&self, unit: &NewUnitRecord) -> Result<(), StoreError> {
        with_retry(&self.retry, "units.record", || {
            let result = self.attempt(|t| {
                // Mirror the foreign key: results for unknown jobs are dropped.
                if !t.jobs.contains_key(&unit.job_id) {
                    return;
                }
                t.next_unit_id += 1;
                let record = UnitRecord {
                    id: t.next_unit_id,
                    job_id: unit.job_id,
                    unit_index: unit.unit_index,
                    unit_name: unit.unit_name.clone(),
                    detections: unit.detections.clone(),
                    predictions: unit.predictions.clone(),
                    comparisons: unit.comparisons.clone(),
                    processing_time_ms: unit.processing_time_ms,
                    error_message: unit.error_message.clone(),
                    created_at: Utc::now(),
                };
                let rows = t.units.entry(unit.job_id).or_default();
                rows.retain(|row| row.unit_index != unit.unit_index);
                rows.push(record);
                rows.sort_by_key(|row| row.unit_index);
            });
            async move { result }
        })
        .await
    }

    async fn unit_results(&self, id: JobId) -> Result<Vec<UnitRecord>, StoreError> {
        with_retry(&self.retry, "units.list", || {
            let result = self.attempt(|t| t.units.get(&id).cloned().unwrap_or_default());
            async move { result }
        })
        .await
    }

    async fn save_summary(&self, id: JobId, summary: &JobSummary) -> Result<(), StoreError> {
        with_retry(&self.retry, "summaries.save", || {
            let result = self.attempt(|t| {
                if t.jobs.contains_key(&id) {
                    t.summaries.insert(id, summary.clone());
                }
            });
            async move { result }
        })
        .await
    }

    async fn summary(&self, id: JobId) -> Result<Option<JobSummary>, StoreError> {
        with_retry(&self.retry, "summaries.get", || {
            let result = self.attempt(|t| t.summaries.get(&id).cloned());
            async move { result }
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        with_retry(&self.retry, "health", || {
            let result = self.attempt(|_| ());
            async move { result }
        })
        .await
    }
}
