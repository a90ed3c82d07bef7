//! Stored aggregate accuracy for a finished job.

use std::collections::BTreeMap;

use labelbench_core::summary::{FieldStats, JobSummary};
use labelbench_core::types::{JobId, Timestamp};
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `job_summaries` table.
#[derive(Debug, Clone, FromRow)]
pub struct SummaryRow {
    pub job_id: JobId,
    pub total_units: i32,
    pub failed_units: i32,
    pub compared_fields: i32,
    pub overall_exact_match_rate: f64,
    pub overall_normalized_match_rate: f64,
    pub overall_cer: f64,
    pub per_field_stats: Json<BTreeMap<String, FieldStats>>,
    pub created_at: Timestamp,
}

impl From<SummaryRow> for JobSummary {
    fn from(row: SummaryRow) -> Self {
        JobSummary {
            total_units: row.total_units.max(0) as usize,
            failed_units: row.failed_units.max(0) as usize,
            compared_fields: row.compared_fields.max(0) as usize,
            overall_exact_match_rate: row.overall_exact_match_rate,
            overall_normalized_match_rate: row.overall_normalized_match_rate,
            overall_cer: row.overall_cer,
            per_field_stats: row.per_field_stats.0,
        }
    }
}
