//! Per-unit inference results.

use labelbench_core::types::{JobId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `unit_results` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UnitRecord {
    pub id: i64,
    pub job_id: JobId,
    pub unit_index: i32,
    pub unit_name: String,
    pub detections: serde_json::Value,
    pub predictions: serde_json::Value,
    pub comparisons: serde_json::Value,
    pub processing_time_ms: f64,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
}

/// Input for recording one processed unit. Re-recording the same
/// `(job_id, unit_index)` replaces the earlier row.
#[derive(Debug, Clone)]
pub struct NewUnitRecord {
    pub job_id: JobId,
    pub unit_index: i32,
    pub unit_name: String,
    pub detections: serde_json::Value,
    pub predictions: serde_json::Value,
    pub comparisons: serde_json::Value,
    pub processing_time_ms: f64,
    pub error_message: Option<String>,
}
