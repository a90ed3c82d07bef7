//! Background dispatcher.
//!
//! Drains the [`SubmissionQueue`] (or, when it is empty, recovers the
//! oldest pending job rows) and launches one worker process per work item
//! while fewer than `max_concurrent` processes are registered. Capacity
//! check, launch and registration all happen under one lock so two
//! dispatch attempts can never both take the last slot.
//!
//! Before the first dispatch, running rows with no registered process are
//! failed: their worker belonged to a previous instance and nothing else
//! will ever observe its exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use labelbench_core::types::JobId;
use labelbench_db::models::job::JobPatch;
use labelbench_db::models::status::JobStatus;
use labelbench_db::{JobStore, StoreError};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio_util::sync::CancellationToken;

use super::launcher::{LaunchError, WorkerLauncher};
use super::queue::SubmissionQueue;
use super::registry::{ProcessHandle, ProcessRegistry};
use super::watchdog::{Watchdog, WatchdogSettings};

/// Pending rows inspected per recovery scan.
const RECOVERY_SCAN_LIMIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    /// No registered process.
    Idle,
    /// A launch is in progress.
    Launching,
    /// At least one worker process is registered.
    Occupied,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    pub max_concurrent: usize,
    pub poll_interval: Duration,
    pub launch_attempts: u32,
    pub launch_retry_delay: Duration,
    pub watchdog: WatchdogSettings,
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    queue: Arc<SubmissionQueue>,
    registry: Arc<ProcessRegistry>,
    launcher: Arc<dyn WorkerLauncher>,
    settings: DispatcherSettings,
    launch_lock: Mutex<()>,
    /// Signalled by watchdogs when a slot frees up.
    wakeup: Arc<Notify>,
    launching: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<SubmissionQueue>,
        registry: Arc<ProcessRegistry>,
        launcher: Arc<dyn WorkerLauncher>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            launcher,
            settings,
            launch_lock: Mutex::new(()),
            wakeup: Arc::new(Notify::new()),
            launching: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> DispatcherState {
        if self.launching.load(Ordering::SeqCst) {
            DispatcherState::Launching
        } else if self.registry.live_process_count() > 0 {
            DispatcherState::Occupied
        } else {
            DispatcherState::Idle
        }
    }

    /// Hold off launches. Used by cancellation so a job cannot be launched
    /// between its process lookup and its status write.
    pub async fn lock_launches(&self) -> MutexGuard<'_, ()> {
        self.launch_lock.lock().await
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            max_concurrent = self.settings.max_concurrent,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Job dispatcher started",
        );

        let mut orphans_swept = self.sweep_orphans().await;
        // Pending rows left by a previous instance are picked up right away.
        self.dispatch_until_full().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                _ = self.queue.notified() => {}
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
            if !orphans_swept {
                orphans_swept = self.sweep_orphans().await;
            }
            self.dispatch_until_full().await;
        }
    }

    /// Returns whether the sweep ran to completion.
    async fn sweep_orphans(&self) -> bool {
        match self.fail_orphaned_jobs().await {
            Ok(0) => true,
            Ok(failed) => {
                tracing::warn!(jobs = failed, "Failed running jobs left by a previous instance");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Orphaned job sweep failed, retrying next cycle");
                false
            }
        }
    }

    /// Fail every running row no registered process serves. Returns how
    /// many rows were failed.
    pub async fn fail_orphaned_jobs(&self) -> Result<usize, StoreError> {
        let _guard = self.launch_lock.lock().await;
        let mut failed = 0;
        loop {
            let running = self.store.running_jobs(RECOVERY_SCAN_LIMIT).await?;
            let scanned = running.len();
            let mut failed_in_scan = 0;
            for job in running {
                if self.registry.contains_job(job.id) {
                    continue;
                }
                let patch = JobPatch::status(JobStatus::Failed).with_error(format!(
                    "Worker lost: server restarted after {}/{} units",
                    job.processed_units, job.total_units,
                ));
                if self.store.update(job.id, &patch).await?.was_applied() {
                    tracing::info!(job_id = %job.id, "Failed orphaned running job");
                    failed_in_scan += 1;
                }
            }
            failed += failed_in_scan;
            if failed_in_scan == 0 || (scanned as i64) < RECOVERY_SCAN_LIMIT {
                return Ok(failed);
            }
        }
    }

    async fn dispatch_until_full(&self) {
        loop {
            match self.try_dispatch().await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Dispatch cycle failed");
                    break;
                }
            }
        }
    }

    /// One dispatch attempt. Returns whether a work item was consumed.
    pub async fn try_dispatch(&self) -> Result<bool, StoreError> {
        let _guard = self.launch_lock.lock().await;

        if self.registry.live_process_count() >= self.settings.max_concurrent {
            return Ok(false);
        }
        let Some(job_ids) = self.next_work().await? else {
            return Ok(false);
        };

        self.launching.store(true, Ordering::SeqCst);
        let launched = self.launch(&job_ids).await;
        let result = match launched {
            Ok(handle) => self.start(handle).await,
            Err(e) => self.fail_launch(&job_ids, &e).await,
        };
        self.launching.store(false, Ordering::SeqCst);

        result.map(|()| true)
    }

    /// Next dispatchable jobs: the queue first, then the oldest pending row
    /// together with its pending batch siblings.
    async fn next_work(&self) -> Result<Option<Vec<JobId>>, StoreError> {
        while let Some(item) = self.queue.pop() {
            let mut job_ids = Vec::with_capacity(item.job_ids.len());
            for id in item.job_ids {
                if self.is_dispatchable(id).await? {
                    job_ids.push(id);
                }
            }
            if !job_ids.is_empty() {
                return Ok(Some(job_ids));
            }
        }

        for job in self.store.pending_jobs(RECOVERY_SCAN_LIMIT).await? {
            if self.registry.contains_job(job.id) || self.queue.contains(job.id) {
                continue;
            }
            let job_ids = match job.batch_id {
                Some(batch_id) => self
                    .store
                    .batch_members(batch_id)
                    .await?
                    .into_iter()
                    .filter(|member| member.status() == JobStatus::Pending)
                    .filter(|member| !self.registry.contains_job(member.id))
                    .map(|member| member.id)
                    .collect(),
                None => vec![job.id],
            };
            if !job_ids.is_empty() {
                tracing::info!(
                    job_id = %job.id,
                    jobs = job_ids.len(),
                    "Recovered pending job without a queued work item",
                );
                return Ok(Some(job_ids));
            }
        }

        Ok(None)
    }

    async fn is_dispatchable(&self, id: JobId) -> Result<bool, StoreError> {
        if self.registry.contains_job(id) {
            return Ok(false);
        }
        Ok(self
            .store
            .get(id)
            .await?
            .is_some_and(|job| job.status() == JobStatus::Pending))
    }

    async fn launch(&self, job_ids: &[JobId]) -> Result<Arc<ProcessHandle>, LaunchError> {
        let mut attempt = 1;
        loop {
            let result = self
                .launcher
                .launch(job_ids)
                .await
                .and_then(|child| ProcessHandle::new(child, job_ids.to_vec()));
            match result {
                Ok(handle) => return Ok(Arc::new(handle)),
                Err(e) if attempt < self.settings.launch_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.settings.launch_attempts,
                        error = %e,
                        "Worker launch failed, retrying",
                    );
                    tokio::time::sleep(self.settings.launch_retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Register the process, mark its first job running and attach a
    /// watchdog. Later batch members stay pending until the worker reaches
    /// them.
    async fn start(&self, handle: Arc<ProcessHandle>) -> Result<(), StoreError> {
        self.registry.register(Arc::clone(&handle));

        let watchdog = Watchdog::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&handle),
            self.settings.watchdog,
            Arc::clone(&self.wakeup),
        );
        let task = tokio::spawn(watchdog.run());
        self.registry.attach_watchdog(handle.pid(), task);

        tracing::info!(
            pid = handle.pid(),
            jobs = handle.job_ids().len(),
            first_job_id = ?handle.job_ids().first(),
            "Worker launched",
        );

        if let Some(&first) = handle.job_ids().first() {
            self.store
                .update(first, &JobPatch::status(JobStatus::Running))
                .await?;
        }
        Ok(())
    }

    /// Launch retries are spent; fail every job of the item so none is left
    /// pending.
    async fn fail_launch(&self, job_ids: &[JobId], error: &LaunchError) -> Result<(), StoreError> {
        tracing::error!(jobs = job_ids.len(), error = %error, "Failed to launch worker");
        let patch = JobPatch::status(JobStatus::Failed)
            .with_error(format!("Failed to launch worker: {error}"));
        for &id in job_ids {
            self.store.update(id, &patch).await?;
        }
        Ok(())
    }
}
