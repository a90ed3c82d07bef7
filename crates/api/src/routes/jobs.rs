//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> submit_job
/// POST   /batch           -> submit_batch
/// GET    /{id}            -> get_job
/// DELETE /{id}            -> delete_job
/// GET    /{id}/results    -> get_results
/// POST   /{id}/cancel     -> cancel_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/batch", post(jobs::submit_batch))
        .route("/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/{id}/results", get(jobs::get_results))
        .route("/{id}/cancel", post(jobs::cancel_job))
}
