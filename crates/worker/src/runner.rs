//! Runs jobs end to end inside a worker process.
//!
//! For each job: mark running, walk the dataset's images in file-name
//! order under a per-unit [`TimeoutGuard`], persist each unit's result and
//! the running count, then store the summary and mark completed. A failed
//! unit is recorded with empty predictions and the job moves on. Only an
//! error outside the per-unit pipeline fails the job.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use labelbench_core::dataset::{Dataset, DatasetError};
use labelbench_core::engine::{validate_variant, OcrEngine};
use labelbench_core::error::CoreError;
use labelbench_core::fields::{csv_column_for, DETECTION_CLASSES};
use labelbench_core::ground_truth::{GroundTruth, GroundTruthError};
use labelbench_core::metrics::{compare_field, FieldComparison};
use labelbench_core::summary::{JobSummary, SummaryBuilder};
use labelbench_core::timeout::{TimeoutError, TimeoutGuard};
use labelbench_core::types::JobId;
use labelbench_db::models::job::{JobPatch, JobRecord};
use labelbench_db::models::status::JobStatus;
use labelbench_db::models::unit::NewUnitRecord;
use labelbench_db::{JobStore, StoreError};

use crate::cache::{CacheKey, DetectionCache};
use crate::pipeline::{Detection, DetectionOutput, Detector, PipelineError, Recognizer};

/// Longest whole-job diagnostic persisted to `error_message`.
pub const MAX_DIAGNOSTIC_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub datasets_dir: PathBuf,
    pub unit_timeout: Option<Duration>,
    pub detection_timeout: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("No recognizer configured for {0}")]
    MissingRecognizer(OcrEngine),

    #[error(transparent)]
    InvalidJob(#[from] CoreError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    GroundTruth(#[from] GroundTruthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("Dataset {version} now has {found} images but the job was submitted with {expected}")]
    UnitCountChanged {
        version: String,
        expected: i32,
        found: usize,
    },

    #[error("{failed} of {total} jobs failed")]
    BatchFailed { failed: usize, total: usize },
}

/// How a job left the runner without a whole-job failure.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(JobSummary),
    /// The row was or became terminal (e.g. cancelled) so the runner
    /// stopped writing to it.
    Skipped(JobStatus),
}

/// What the per-unit pipeline produced.
struct UnitPrediction {
    detections: Vec<Detection>,
    predictions: BTreeMap<String, String>,
}

pub struct WorkerRunner {
    store: Arc<dyn JobStore>,
    detector: Arc<dyn Detector>,
    recognizers: HashMap<OcrEngine, Arc<dyn Recognizer>>,
    settings: RunnerSettings,
    cache: DetectionCache,
}

impl WorkerRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        detector: Arc<dyn Detector>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            store,
            detector,
            recognizers: HashMap::new(),
            settings,
            cache: DetectionCache::new(),
        }
    }

    /// Register the recognizer serving its engine.
    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizers.insert(recognizer.engine(), recognizer);
        self
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    /// Run jobs strictly one after another, sharing the detection cache.
    ///
    /// A failed job does not stop the ones after it; the batch as a whole
    /// reports failure so the process exits non-zero.
    pub async fn run_batch(&self, job_ids: &[JobId]) -> Result<Vec<JobOutcome>, RunnerError> {
        let mut outcomes = Vec::with_capacity(job_ids.len());
        let mut failed = 0usize;

        for &job_id in job_ids {
            match self.run_job(job_id).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if job_ids.len() == 1 => return Err(e),
                Err(_) => failed += 1,
            }
        }

        if failed > 0 {
            return Err(RunnerError::BatchFailed {
                failed,
                total: job_ids.len(),
            });
        }
        Ok(outcomes)
    }

    /// Run one job. Whole-job errors mark the job failed before returning.
    pub async fn run_job(&self, job_id: JobId) -> Result<JobOutcome, RunnerError> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(RunnerError::JobNotFound(job_id))?;

        if job.is_terminal() {
            tracing::info!(%job_id, status = %job.status(), "Job already finished, skipping");
            return Ok(JobOutcome::Skipped(job.status()));
        }

        match self.execute(&job).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let diagnostic = truncate_diagnostic(&e.to_string());
                tracing::error!(%job_id, error = %diagnostic, "Job failed");
                let patch = JobPatch::status(JobStatus::Failed).with_error(diagnostic);
                if let Err(store_err) = self.store.update(job_id, &patch).await {
                    // The watchdog infers failure from the exit code.
                    tracing::error!(%job_id, error = %store_err, "Could not record job failure");
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, job: &JobRecord) -> Result<JobOutcome, RunnerError> {
        let engine: OcrEngine = job.engine.parse()?;
        validate_variant(&job.variant)?;
        let recognizer = self
            .recognizers
            .get(&engine)
            .cloned()
            .ok_or(RunnerError::MissingRecognizer(engine))?;

        let started = self
            .store
            .update(job.id, &JobPatch::status(JobStatus::Running))
            .await?;
        if !started.was_applied() {
            return Ok(JobOutcome::Skipped(started.record().status()));
        }

        let dataset = Dataset::open(&self.settings.datasets_dir, &job.dataset_ref)?;
        let images = dataset.images()?;
        if usize::try_from(job.total_units).ok() != Some(images.len()) {
            return Err(RunnerError::UnitCountChanged {
                version: job.dataset_ref.clone(),
                expected: job.total_units,
                found: images.len(),
            });
        }
        // Parsed inline, so the unit budget can only be checked afterwards.
        let ground_truth = match dataset.ground_truth_path() {
            Some(path) => Some(
                TimeoutGuard::start_with(
                    format!("loading {}", path.display()),
                    self.settings.unit_timeout,
                )
                .run_sync(|| GroundTruth::load(&path))??,
            ),
            None => None,
        };

        tracing::info!(
            job_id = %job.id,
            engine = %engine,
            variant = %job.variant,
            units = images.len(),
            "Job started",
        );

        let mut summary = SummaryBuilder::new();
        for (index, path) in images.iter().enumerate() {
            let unit_name = file_name(path);
            let started_at = Instant::now();
            let result = self
                .run_unit(recognizer.as_ref(), &job.variant, path, &unit_name)
                .await;
            let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;

            let (prediction, error_message) = match result {
                Ok(prediction) => (prediction, None),
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        unit_index = index,
                        unit = %unit_name,
                        error = %e,
                        "Unit failed",
                    );
                    (
                        UnitPrediction {
                            detections: Vec::new(),
                            predictions: BTreeMap::new(),
                        },
                        Some(e.to_string()),
                    )
                }
            };

            let comparisons = ground_truth
                .as_ref()
                .map(|gt| compare_unit(gt, &unit_name, &prediction.predictions))
                .unwrap_or_default();
            summary.add_unit(&comparisons, error_message.is_some());

            self.store
                .record_unit(&NewUnitRecord {
                    job_id: job.id,
                    unit_index: to_i32(index),
                    unit_name,
                    detections: to_json(&prediction.detections),
                    predictions: to_json(&prediction.predictions),
                    comparisons: to_json(&comparisons),
                    processing_time_ms: elapsed_ms,
                    error_message,
                })
                .await?;

            let progress = self
                .store
                .update(
                    job.id,
                    &JobPatch::status(JobStatus::Running).with_progress(to_i32(index + 1)),
                )
                .await?;
            if !progress.was_applied() {
                let status = progress.record().status();
                tracing::info!(job_id = %job.id, %status, "Job finished elsewhere, stopping");
                return Ok(JobOutcome::Skipped(status));
            }
        }

        let summary = summary.finish();
        self.store.save_summary(job.id, &summary).await?;

        let done = self
            .store
            .update(
                job.id,
                &JobPatch::status(JobStatus::Completed).with_progress(to_i32(images.len())),
            )
            .await?;
        if !done.was_applied() {
            return Ok(JobOutcome::Skipped(done.record().status()));
        }

        tracing::info!(
            job_id = %job.id,
            units = summary.total_units,
            failed_units = summary.failed_units,
            exact_match_rate = summary.overall_exact_match_rate,
            "Job completed",
        );
        Ok(JobOutcome::Completed(summary))
    }

    async fn run_unit(
        &self,
        recognizer: &dyn Recognizer,
        variant: &str,
        path: &Path,
        unit_name: &str,
    ) -> Result<UnitPrediction, PipelineError> {
        let guard = TimeoutGuard::start_with(unit_name, self.settings.unit_timeout);
        guard
            .run(async {
                let detection = self.detect(path, unit_name).await?;
                let mut predictions = BTreeMap::new();
                for crop in &detection.crops {
                    let text = recognizer.recognize(crop, variant).await?;
                    predictions.insert(crop.class_name.clone(), text);
                }
                Ok::<_, PipelineError>(UnitPrediction {
                    detections: detection.detections.clone(),
                    predictions,
                })
            })
            .await?
    }

    async fn detect(
        &self,
        path: &Path,
        unit_name: &str,
    ) -> Result<Arc<DetectionOutput>, PipelineError> {
        let key = CacheKey::for_path(path).ok();
        if let Some(hit) = key.as_ref().and_then(|k| self.cache.get(k)) {
            tracing::debug!(unit = %unit_name, "Detection cache hit");
            return Ok(hit);
        }

        let guard = TimeoutGuard::start_with(
            format!("detection of {unit_name}"),
            self.settings.detection_timeout,
        );
        let output = Arc::new(guard.run(self.detector.detect_and_crop(path)).await??);
        if let Some(key) = key {
            self.cache.insert(key, Arc::clone(&output));
        }
        Ok(output)
    }
}

/// Compare every detection class against the unit's ground-truth row.
/// Units without a row contribute no comparisons.
fn compare_unit(
    ground_truth: &GroundTruth,
    unit_name: &str,
    predictions: &BTreeMap<String, String>,
) -> Vec<FieldComparison> {
    let Some(row) = ground_truth.row(unit_name) else {
        return Vec::new();
    };
    DETECTION_CLASSES
        .iter()
        .map(|class| {
            let prediction = predictions.get(*class).map(String::as_str).unwrap_or("");
            compare_field(prediction, row.get(csv_column_for(class)), class)
        })
        .collect()
}

/// Bound a diagnostic to [`MAX_DIAGNOSTIC_CHARS`] characters.
pub fn truncate_diagnostic(message: &str) -> String {
    match message.char_indices().nth(MAX_DIAGNOSTIC_CHARS) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn to_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_diagnostics_are_untouched() {
        assert_eq!(truncate_diagnostic("boom"), "boom");
    }

    #[test]
    fn long_diagnostics_are_cut_on_char_boundary() {
        let message = "é".repeat(MAX_DIAGNOSTIC_CHARS + 10);
        let cut = truncate_diagnostic(&message);
        assert_eq!(cut.chars().count(), MAX_DIAGNOSTIC_CHARS);
    }

    #[test]
    fn units_without_ground_truth_row_are_not_compared() {
        let gt = GroundTruth::parse("Box Label,Barcode\nother.jpg,A1\n").unwrap();
        assert!(compare_unit(&gt, "missing.jpg", &BTreeMap::new()).is_empty());
    }

    #[test]
    fn every_class_is_compared_when_row_exists() {
        let gt = GroundTruth::parse("Box Label,SKU Name (?),Barcode\nimg.jpg,Beef Ribs,0123\n")
            .unwrap();
        let predictions = BTreeMap::from([("SKU Name".to_string(), "Beef Ribs".to_string())]);
        let comparisons = compare_unit(&gt, "img.jpg", &predictions);

        assert_eq!(comparisons.len(), DETECTION_CLASSES.len());
        let sku = comparisons.iter().find(|c| c.field_name == "SKU Name").unwrap();
        assert!(sku.exact_match);
        let barcode = comparisons.iter().find(|c| c.field_name == "Barcode").unwrap();
        assert_eq!(barcode.ground_truth, "0123");
        assert_eq!(barcode.prediction, "");
        assert!(!barcode.exact_match);
    }
}
