pub mod health;
pub mod jobs;

use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /engines                        supported OCR engines (GET)
/// /preprocessing-options          supported variant labels (GET)
/// /datasets                       dataset discovery (GET)
/// /images/{version}/{filename}    one dataset image (GET)
///
/// /jobs                           list, submit
/// /jobs/batch                     submit one batch (POST)
/// /jobs/{id}                      status, delete
/// /jobs/{id}/results              summary and unit results (GET)
/// /jobs/{id}/cancel               cancel (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/engines", get(handlers::catalog::list_engines))
        .route(
            "/preprocessing-options",
            get(handlers::catalog::list_preprocessing_options),
        )
        .route("/datasets", get(handlers::catalog::list_datasets))
        .route("/images/{version}/{filename}", get(handlers::images::serve_image))
        .nest("/jobs", jobs::router())
}
