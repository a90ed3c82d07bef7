//! Per-process exit observer.
//!
//! A [`Watchdog`] polls one worker process until it exits, then writes a
//! terminal status for every job the process served that the worker left
//! non-terminal. A store error does not end the watchdog: the write is
//! retried with capped backoff until it lands or the row turns terminal or
//! disappears. It deregisters the process when it finishes, however it
//! finishes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use labelbench_core::types::{JobId, Timestamp};
use labelbench_db::models::job::{JobPatch, JobRecord};
use labelbench_db::models::status::JobStatus;
use labelbench_db::{JobStore, StoreError};
use tokio::sync::Notify;

use super::registry::{ProcessExit, ProcessHandle, ProcessRegistry};

/// Error message written to jobs cancelled on request.
pub const CANCELLED_MESSAGE: &str = "Cancelled by request";

/// Upper bound on the delay between reconcile attempts.
const MAX_RECONCILE_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct WatchdogSettings {
    pub poll_interval: Duration,
    /// A job whose last progress write is this close to the observed exit
    /// is re-read once after waiting this long.
    pub reconcile_tolerance: Duration,
}

pub struct Watchdog {
    store: Arc<dyn JobStore>,
    registry: Arc<ProcessRegistry>,
    handle: Arc<ProcessHandle>,
    settings: WatchdogSettings,
    wakeup: Arc<Notify>,
}

/// Removes the process from the registry and wakes the dispatcher on drop,
/// including when the watchdog task is aborted.
struct Deregister {
    registry: Arc<ProcessRegistry>,
    pid: u32,
    wakeup: Arc<Notify>,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.registry.deregister(self.pid);
        self.wakeup.notify_one();
        tracing::debug!(pid = self.pid, "Worker deregistered");
    }
}

impl Watchdog {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<ProcessRegistry>,
        handle: Arc<ProcessHandle>,
        settings: WatchdogSettings,
        wakeup: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            registry,
            handle,
            settings,
            wakeup,
        }
    }

    pub async fn run(self) {
        let _deregister = Deregister {
            registry: Arc::clone(&self.registry),
            pid: self.handle.pid(),
            wakeup: Arc::clone(&self.wakeup),
        };

        let exit = self.wait_for_exit().await;
        let exited_at = Utc::now();
        tracing::info!(
            pid = self.handle.pid(),
            exit = %exit.describe(),
            jobs = self.handle.job_ids().len(),
            "Worker exited",
        );

        for &job_id in self.handle.job_ids() {
            self.reconcile_until_settled(job_id, exit, exited_at).await;
        }
    }

    async fn reconcile_until_settled(
        &self,
        job_id: JobId,
        exit: ProcessExit,
        exited_at: Timestamp,
    ) {
        let mut delay = self.settings.poll_interval.max(Duration::from_millis(10));
        let mut attempt = 1u32;
        loop {
            match self.reconcile(job_id, exit, exited_at).await {
                Ok(()) | Err(StoreError::NotFound(_)) => return,
                Err(e) => {
                    tracing::error!(
                        job_id = %job_id,
                        pid = self.handle.pid(),
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Failed to reconcile job status",
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RECONCILE_BACKOFF);
                    attempt += 1;
                }
            }
        }
    }

    async fn wait_for_exit(&self) -> ProcessExit {
        loop {
            if let Some(exit) = self.handle.poll_exit().await {
                return exit;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn reconcile(
        &self,
        job_id: JobId,
        exit: ProcessExit,
        exited_at: Timestamp,
    ) -> Result<(), StoreError> {
        let Some(mut job) = self.store.get(job_id).await? else {
            return Ok(());
        };
        if job.is_terminal() {
            return Ok(());
        }

        if progressed_near(&job, exited_at, self.settings.reconcile_tolerance) {
            tokio::time::sleep(self.settings.reconcile_tolerance).await;
            job = match self.store.get(job_id).await? {
                Some(job) if !job.is_terminal() => job,
                _ => return Ok(()),
            };
        }

        let patch = decide_final_status(&job, exit, self.handle.cancel_requested());
        let outcome = self.store.update(job_id, &patch).await?;
        if outcome.was_applied() {
            tracing::info!(
                job_id = %job_id,
                status = %outcome.record().status(),
                processed_units = outcome.record().processed_units,
                total_units = outcome.record().total_units,
                "Job reconciled after worker exit",
            );
        }
        Ok(())
    }
}

fn progressed_near(job: &JobRecord, exited_at: Timestamp, tolerance: Duration) -> bool {
    let Some(last) = job.last_progress_at else {
        return false;
    };
    let Ok(tolerance) = chrono::Duration::from_std(tolerance) else {
        return false;
    };
    exited_at.signed_duration_since(last) <= tolerance
}

/// Terminal patch for a job whose worker exited without finishing it.
///
/// A cancel request wins. Otherwise a clean exit with every unit processed
/// completes; anything else fails with the exit status and progress.
pub fn decide_final_status(job: &JobRecord, exit: ProcessExit, cancel_requested: bool) -> JobPatch {
    if cancel_requested {
        return JobPatch::status(JobStatus::Cancelled).with_error(CANCELLED_MESSAGE);
    }
    if exit.success() && job.processed_units >= job.total_units {
        return JobPatch::status(JobStatus::Completed);
    }
    JobPatch::status(JobStatus::Failed).with_error(format!(
        "Worker exited with {} after {}/{} units",
        exit.describe(),
        job.processed_units,
        job.total_units,
    ))
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn job(processed: i32, total: i32) -> JobRecord {
        let now = Utc::now();
        JobRecord {
            id: Uuid::now_v7(),
            engine: "easyocr".into(),
            dataset_ref: "v1".into(),
            variant: "none".into(),
            batch_id: None,
            status_id: JobStatus::Running.id(),
            total_units: total,
            processed_units: processed,
            error_message: None,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            last_progress_at: Some(now),
            updated_at: now,
        }
    }

    const CLEAN: ProcessExit = ProcessExit {
        code: Some(0),
        signal: None,
    };

    #[test]
    fn clean_exit_with_full_progress_completes() {
        let patch = decide_final_status(&job(10, 10), CLEAN, false);
        assert_eq!(patch, JobPatch::status(JobStatus::Completed));
    }

    #[test]
    fn clean_exit_with_partial_progress_fails() {
        let patch = decide_final_status(&job(3, 10), CLEAN, false);
        assert_eq!(patch.status, Some(JobStatus::Failed));
        assert_eq!(
            patch.error_message.as_deref(),
            Some("Worker exited with exit code 0 after 3/10 units")
        );
    }

    #[test]
    fn signal_is_named_in_failure() {
        let killed = ProcessExit {
            code: None,
            signal: Some(9),
        };
        let patch = decide_final_status(&job(10, 10), killed, false);
        assert_eq!(patch.status, Some(JobStatus::Failed));
        assert!(patch.error_message.unwrap().contains("signal 9"));
    }

    #[test]
    fn cancel_request_wins_over_exit_status() {
        let patch = decide_final_status(&job(10, 10), CLEAN, true);
        assert_eq!(patch.status, Some(JobStatus::Cancelled));
    }

    #[test]
    fn recent_progress_is_near_exit() {
        let mut record = job(1, 2);
        let exited = Utc::now();
        assert!(progressed_near(&record, exited, Duration::from_millis(250)));

        record.last_progress_at = Some(exited - chrono::Duration::seconds(5));
        assert!(!progressed_near(&record, exited, Duration::from_millis(250)));

        record.last_progress_at = None;
        assert!(!progressed_near(&record, exited, Duration::from_millis(250)));
    }
}
