//! Read-only catalog endpoints: engines, preprocessing variants, datasets.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use labelbench_core::engine::{OcrEngine, PREPROCESSING_OPTIONS};
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct EngineInfo {
    pub id: OcrEngine,
    pub name: &'static str,
    pub description: &'static str,
}

/// GET /api/v1/engines
pub async fn list_engines() -> impl IntoResponse {
    let engines: Vec<EngineInfo> = OcrEngine::ALL
        .into_iter()
        .map(|engine| EngineInfo {
            id: engine,
            name: engine.display_name(),
            description: engine.description(),
        })
        .collect();
    Json(DataResponse { data: engines })
}

/// GET /api/v1/preprocessing-options
pub async fn list_preprocessing_options() -> impl IntoResponse {
    Json(DataResponse {
        data: PREPROCESSING_OPTIONS,
    })
}

/// GET /api/v1/datasets
///
/// Every dataset version under the configured root, with image counts.
pub async fn list_datasets(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let datasets = state.orchestrator.datasets()?;
    Ok(Json(DataResponse { data: datasets }))
}
