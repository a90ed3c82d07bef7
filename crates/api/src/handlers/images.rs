//! Dataset image files, so clients can show the unit a result belongs to.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use labelbench_core::dataset::media_type;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /api/v1/images/{version}/{filename}
pub async fn serve_image(
    State(state): State<AppState>,
    Path((version, filename)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let path = state.orchestrator.dataset_image(&version, &filename)?;
    let data = tokio::fs::read(&path)
        .await
        .map_err(|e| AppError::InternalError(format!("Reading {}: {e}", path.display())))?;

    Ok((
        [
            (header::CONTENT_TYPE, media_type(&path)),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        data,
    ))
}
