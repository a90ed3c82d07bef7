//! Handlers for the `/jobs` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use labelbench_core::engine::DEFAULT_VARIANT;
use labelbench_core::types::JobId;
use labelbench_db::models::job::JobRecord;
use labelbench_db::models::status::JobStatus;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::orchestrator::JobResults;
use crate::query::LimitParams;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub engine: String,
    pub dataset_version: String,
    #[serde(default = "default_variant")]
    pub variant: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitBatchRequest {
    pub engine: String,
    pub dataset_version: String,
    pub variants: Vec<String>,
}

fn default_variant() -> String {
    DEFAULT_VARIANT.to_string()
}

/// A job row with its decoded status and progress percentage.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: JobRecord,
    pub status: JobStatus,
    pub progress: u8,
}

impl From<JobRecord> for JobView {
    fn from(job: JobRecord) -> Self {
        Self {
            status: job.status(),
            progress: job.progress_percent(),
            job,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResultsView {
    pub job: JobView,
    pub summary: Option<labelbench_core::summary::JobSummary>,
    pub units: Vec<labelbench_db::models::unit::UnitRecord>,
}

impl From<JobResults> for ResultsView {
    fn from(results: JobResults) -> Self {
        Self {
            job: results.job.into(),
            summary: results.summary,
            units: results.units,
        }
    }
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Create a pending job over every image of the dataset and enqueue it.
/// Returns 201 with the created job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJobRequest>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .orchestrator
        .submit(&input.engine, &input.dataset_version, &input.variant)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: JobView::from(job),
        }),
    ))
}

/// POST /api/v1/jobs/batch
///
/// One job per variant, all served sequentially by a single worker process.
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(input): Json<SubmitBatchRequest>,
) -> AppResult<impl IntoResponse> {
    if input.variants.is_empty() {
        return Err(AppError::BadRequest(
            "variants must contain at least one entry".into(),
        ));
    }
    let jobs = state
        .orchestrator
        .submit_batch(&input.engine, &input.dataset_version, &input.variants)
        .await?;
    let views: Vec<JobView> = jobs.into_iter().map(JobView::from).collect();
    Ok((StatusCode::CREATED, Json(DataResponse { data: views })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs?limit=
///
/// Newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.orchestrator.list(params.resolved()).await?;
    let views: Vec<JobView> = jobs.into_iter().map(JobView::from).collect();
    Ok(Json(DataResponse { data: views }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.status(job_id).await?;
    Ok(Json(DataResponse {
        data: JobView::from(job),
    }))
}

/// GET /api/v1/jobs/{id}/results
///
/// The job, its aggregate summary (once completed) and every unit result
/// persisted so far.
pub async fn get_results(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let results = state.orchestrator.results(job_id).await?;
    Ok(Json(DataResponse {
        data: ResultsView::from(results),
    }))
}

// ---------------------------------------------------------------------------
// Cancel / delete
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Terminates the serving worker first. 409 if the job is already terminal.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let report = state.orchestrator.cancel(job_id).await?;
    Ok(Json(DataResponse { data: report }))
}

/// DELETE /api/v1/jobs/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let report = state.orchestrator.delete(job_id).await?;
    Ok(Json(DataResponse { data: report }))
}
