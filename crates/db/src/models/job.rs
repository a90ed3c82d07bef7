//! Inference job rows and the patch type used to mutate them.

use labelbench_core::types::{JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use super::status::{JobStatus, StatusId};

/// A row from the `inference_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub engine: String,
    pub dataset_ref: String,
    pub variant: String,
    pub batch_id: Option<Uuid>,
    pub status_id: StatusId,
    pub total_units: i32,
    pub processed_units: i32,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub last_progress_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl JobRecord {
    /// Decoded status. Unknown IDs are treated as failed so they are never
    /// dispatched.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_id(self.status_id).unwrap_or(JobStatus::Failed)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Whole-number progress in `0..=100`. An empty job reports 0 until it
    /// completes.
    pub fn progress_percent(&self) -> u8 {
        if self.total_units <= 0 {
            return if self.status() == JobStatus::Completed { 100 } else { 0 };
        }
        let ratio = f64::from(self.processed_units) / f64::from(self.total_units);
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// Input for creating a new pending job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub engine: String,
    pub dataset_ref: String,
    pub variant: String,
    pub total_units: i32,
    pub batch_id: Option<Uuid>,
}

/// Partial update applied to a non-terminal job.
///
/// `None` fields are left untouched. Progress is clamped to
/// `0..=total_units` by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub processed_units: Option<i32>,
    pub error_message: Option<String>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(processed_units: i32) -> Self {
        Self {
            processed_units: Some(processed_units),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, processed_units: i32) -> Self {
        self.processed_units = Some(processed_units);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.processed_units.is_none() && self.error_message.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(status: JobStatus, processed: i32, total: i32) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            id: Uuid::now_v7(),
            engine: "easyocr".into(),
            dataset_ref: "v1".into(),
            variant: "none".into(),
            batch_id: None,
            status_id: status.id(),
            total_units: total,
            processed_units: processed,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_progress_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn progress_percent_rounds() {
        assert_eq!(record(JobStatus::Running, 1, 3).progress_percent(), 33);
        assert_eq!(record(JobStatus::Running, 2, 3).progress_percent(), 67);
        assert_eq!(record(JobStatus::Completed, 3, 3).progress_percent(), 100);
    }

    #[test]
    fn empty_job_progress_depends_on_status() {
        assert_eq!(record(JobStatus::Running, 0, 0).progress_percent(), 0);
        assert_eq!(record(JobStatus::Completed, 0, 0).progress_percent(), 100);
    }

    #[test]
    fn unknown_status_id_reads_as_failed() {
        let mut job = record(JobStatus::Pending, 0, 1);
        job.status_id = 42;
        assert_eq!(job.status(), JobStatus::Failed);
        assert!(job.is_terminal());
    }

    #[test]
    fn patch_builders_compose() {
        let patch = JobPatch::status(JobStatus::Failed)
            .with_progress(4)
            .with_error("boom");
        assert_eq!(patch.status, Some(JobStatus::Failed));
        assert_eq!(patch.processed_units, Some(4));
        assert_eq!(patch.error_message.as_deref(), Some("boom"));
        assert!(JobPatch::default().is_empty());
    }
}
