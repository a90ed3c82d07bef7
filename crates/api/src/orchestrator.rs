//! Facade over the job store, submission queue, process registry and
//! dispatcher. Handlers call into this; nothing else in the API crate
//! touches the engine modules directly.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use labelbench_core::dataset::{list_datasets, Dataset, DatasetError, DatasetInfo};
use labelbench_core::engine::{validate_variant, OcrEngine};
use labelbench_core::error::CoreError;
use labelbench_core::summary::JobSummary;
use labelbench_core::types::JobId;
use labelbench_db::models::job::{JobPatch, JobRecord, NewJob};
use labelbench_db::models::status::JobStatus;
use labelbench_db::models::unit::UnitRecord;
use labelbench_db::{JobStore, StoreError};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::engine::dispatcher::{Dispatcher, DispatcherSettings, DispatcherState};
use crate::engine::launcher::WorkerLauncher;
use crate::engine::queue::{SubmissionQueue, WorkItem};
use crate::engine::registry::ProcessRegistry;
use crate::engine::watchdog::{WatchdogSettings, CANCELLED_MESSAGE};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A job with everything the worker persisted for it.
#[derive(Debug, Clone, Serialize)]
pub struct JobResults {
    pub job: JobRecord,
    pub summary: Option<JobSummary>,
    pub units: Vec<UnitRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAction {
    Cancelled,
    Deleted,
}

/// What a cancel or delete did.
///
/// `affected_job_ids` always starts with the requested job. When the job
/// shared a batch process, the siblings cancelled by terminating it follow
/// and `shared_process` is set.
#[derive(Debug, Clone, Serialize)]
pub struct CancelReport {
    pub job_id: JobId,
    pub action: CancelAction,
    pub affected_job_ids: Vec<JobId>,
    pub shared_process: bool,
    pub process_terminated: bool,
}

#[derive(Default)]
struct StoppedProcess {
    siblings_cancelled: Vec<JobId>,
    shared_process: bool,
    process_terminated: bool,
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    queue: Arc<SubmissionQueue>,
    registry: Arc<ProcessRegistry>,
    dispatcher: Arc<Dispatcher>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        launcher: Arc<dyn WorkerLauncher>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let queue = Arc::new(SubmissionQueue::new());
        let registry = Arc::new(ProcessRegistry::new());
        let settings = DispatcherSettings {
            max_concurrent: config.max_concurrent_workers.max(1),
            poll_interval: config.dispatch_poll_interval,
            launch_attempts: config.launch_attempts.max(1),
            launch_retry_delay: config.launch_retry_delay,
            watchdog: WatchdogSettings {
                poll_interval: config.watchdog_poll_interval,
                reconcile_tolerance: config.reconcile_tolerance,
            },
        };
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&registry),
            launcher,
            settings,
        ));

        Arc::new(Self {
            store,
            queue,
            registry,
            dispatcher,
            config,
            cancel: CancellationToken::new(),
            dispatcher_task: Mutex::new(None),
        })
    }

    /// Spawn the dispatcher loop. Calling it twice is a no-op.
    pub fn start(&self) {
        let Ok(mut task) = self.dispatcher_task.lock() else {
            return;
        };
        if task.is_some() {
            return;
        }
        let dispatcher = Arc::clone(&self.dispatcher);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move {
            dispatcher.run(cancel).await;
        }));
    }

    /// Stop dispatching, terminate every live worker and wait for their
    /// watchdogs to reconcile.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.dispatcher_task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.await;
        }

        let _launches = self.dispatcher.lock_launches().await;
        let grace = self.config.kill_grace_period;
        let terminations: Vec<_> = self
            .registry
            .handles()
            .into_iter()
            .map(|handle| {
                tokio::spawn(async move {
                    let exit = handle.terminate(grace).await;
                    tracing::info!(pid = handle.pid(), exit = %exit.describe(), "Worker stopped");
                })
            })
            .collect();
        for termination in terminations {
            let _ = termination.await;
        }
        for watchdog in self.registry.take_watchdogs() {
            let _ = watchdog.await;
        }
        tracing::info!("Orchestrator stopped");
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn queued_items(&self) -> usize {
        self.queue.len()
    }

    pub fn live_workers(&self) -> usize {
        self.registry.live_process_count()
    }

    pub fn dispatcher_state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    /// Create a pending job over every image of `dataset_version` and
    /// enqueue it.
    pub async fn submit(
        &self,
        engine: &str,
        dataset_version: &str,
        variant: &str,
    ) -> Result<JobRecord, OrchestratorError> {
        let engine: OcrEngine = engine.parse()?;
        validate_variant(variant)?;
        let (dataset, total_units) = self.resolve_dataset(dataset_version)?;

        let job = self
            .store
            .create(NewJob {
                engine: engine.as_str().to_string(),
                dataset_ref: dataset.version().to_string(),
                variant: variant.to_string(),
                total_units,
                batch_id: None,
            })
            .await?;
        self.queue.push(WorkItem::single(job.id));

        tracing::info!(
            job_id = %job.id,
            engine = %engine,
            dataset = dataset.version(),
            variant,
            total_units,
            "Job submitted",
        );
        Ok(job)
    }

    /// Create one pending job per variant, sharing a batch id, and enqueue
    /// them as a single work item served by one worker process.
    pub async fn submit_batch(
        &self,
        engine: &str,
        dataset_version: &str,
        variants: &[String],
    ) -> Result<Vec<JobRecord>, OrchestratorError> {
        let engine: OcrEngine = engine.parse()?;
        if variants.is_empty() {
            return Err(CoreError::Validation("At least one variant is required".into()).into());
        }
        for variant in variants {
            validate_variant(variant)?;
        }
        let (dataset, total_units) = self.resolve_dataset(dataset_version)?;

        let batch_id = Uuid::now_v7();
        let jobs = self
            .store
            .create_batch(
                variants
                    .iter()
                    .map(|variant| NewJob {
                        engine: engine.as_str().to_string(),
                        dataset_ref: dataset.version().to_string(),
                        variant: variant.clone(),
                        total_units,
                        batch_id: Some(batch_id),
                    })
                    .collect(),
            )
            .await?;
        self.queue
            .push(WorkItem::batch(jobs.iter().map(|job| job.id).collect()));

        tracing::info!(
            batch_id = %batch_id,
            engine = %engine,
            dataset = dataset.version(),
            jobs = jobs.len(),
            "Batch submitted",
        );
        Ok(jobs)
    }

    pub async fn status(&self, id: JobId) -> Result<JobRecord, OrchestratorError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id).into())
    }

    pub async fn results(&self, id: JobId) -> Result<JobResults, OrchestratorError> {
        let job = self.status(id).await?;
        let summary = self.store.summary(id).await?;
        let units = self.store.unit_results(id).await?;
        Ok(JobResults {
            job,
            summary,
            units,
        })
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<JobRecord>, OrchestratorError> {
        Ok(self.store.list(limit).await?)
    }

    pub fn datasets(&self) -> Result<Vec<DatasetInfo>, OrchestratorError> {
        Ok(list_datasets(&self.config.datasets_dir)?)
    }

    /// Resolved path of one dataset image, confined to its images directory.
    pub fn dataset_image(
        &self,
        version: &str,
        filename: &str,
    ) -> Result<PathBuf, OrchestratorError> {
        let dataset = Dataset::open(&self.config.datasets_dir, version)?;
        Ok(dataset.image_path(filename)?)
    }

    /// Cancel a non-terminal job. A live worker process serving it is
    /// terminated first; batch siblings sharing that process are cancelled
    /// with it.
    pub async fn cancel(&self, id: JobId) -> Result<CancelReport, OrchestratorError> {
        let _launches = self.dispatcher.lock_launches().await;

        let job = self.status(id).await?;
        if job.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Job {id} is already {}",
                job.status()
            ))
            .into());
        }

        self.queue.remove_job(id);
        let stopped = self.stop_process(id).await?;
        self.store.update(id, &cancel_patch()).await?;

        tracing::info!(
            job_id = %id,
            siblings = stopped.siblings_cancelled.len(),
            process_terminated = stopped.process_terminated,
            "Job cancelled",
        );
        Ok(report(id, CancelAction::Cancelled, stopped))
    }

    /// Delete a job and its results. A live worker process serving it is
    /// terminated before the row is removed.
    pub async fn delete(&self, id: JobId) -> Result<CancelReport, OrchestratorError> {
        let _launches = self.dispatcher.lock_launches().await;

        let job = self.status(id).await?;
        self.queue.remove_job(id);
        let stopped = if job.is_terminal() {
            StoppedProcess::default()
        } else {
            self.stop_process(id).await?
        };

        if !self.store.delete(id).await? {
            return Err(StoreError::NotFound(id).into());
        }

        tracing::info!(
            job_id = %id,
            siblings = stopped.siblings_cancelled.len(),
            process_terminated = stopped.process_terminated,
            "Job deleted",
        );
        Ok(report(id, CancelAction::Deleted, stopped))
    }

    /// Terminate the process serving `id`, if any, and cancel the other
    /// jobs it was serving.
    async fn stop_process(&self, id: JobId) -> Result<StoppedProcess, StoreError> {
        let Some(handle) = self.registry.handle_for_job(id) else {
            return Ok(StoppedProcess::default());
        };

        handle.mark_cancel_requested();
        let was_alive = handle.is_alive().await;
        let exit = handle.terminate(self.config.kill_grace_period).await;
        tracing::info!(
            job_id = %id,
            pid = handle.pid(),
            exit = %exit.describe(),
            "Worker terminated for cancellation",
        );

        let mut siblings_cancelled = Vec::new();
        for &other in handle.job_ids().iter().filter(|&&other| other != id) {
            let outcome = self.store.update(other, &cancel_patch()).await?;
            let record = outcome.record();
            if outcome.was_applied() || record.status() == JobStatus::Cancelled {
                siblings_cancelled.push(other);
            }
        }

        Ok(StoppedProcess {
            siblings_cancelled,
            shared_process: handle.job_ids().len() > 1,
            process_terminated: was_alive,
        })
    }

    fn resolve_dataset(&self, version: &str) -> Result<(Dataset, i32), OrchestratorError> {
        let dataset = Dataset::open(&self.config.datasets_dir, version)?;
        let count = dataset.require_images()?.len();
        let total_units = i32::try_from(count).map_err(|_| {
            CoreError::Validation(format!("Dataset {version} has too many images ({count})"))
        })?;
        Ok((dataset, total_units))
    }
}

fn cancel_patch() -> JobPatch {
    JobPatch::status(JobStatus::Cancelled).with_error(CANCELLED_MESSAGE)
}

fn report(id: JobId, action: CancelAction, stopped: StoppedProcess) -> CancelReport {
    let mut affected_job_ids = vec![id];
    affected_job_ids.extend(stopped.siblings_cancelled);
    CancelReport {
        job_id: id,
        action,
        affected_job_ids,
        shared_process: stopped.shared_process,
        process_terminated: stopped.process_terminated,
    }
}
