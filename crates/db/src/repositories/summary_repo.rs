//! Repository for the `job_summaries` table.

use labelbench_core::summary::JobSummary;
use labelbench_core::types::JobId;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::summary::SummaryRow;

pub struct SummaryRepo;

impl SummaryRepo {
    /// Insert or replace the summary for a job.
    pub async fn upsert(pool: &PgPool, job_id: JobId, summary: &JobSummary) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO job_summaries \
                 (job_id, total_units, failed_units, compared_fields, \
                  overall_exact_match_rate, overall_normalized_match_rate, overall_cer, \
                  per_field_stats) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (job_id) DO UPDATE SET \
                 total_units = EXCLUDED.total_units, \
                 failed_units = EXCLUDED.failed_units, \
                 compared_fields = EXCLUDED.compared_fields, \
                 overall_exact_match_rate = EXCLUDED.overall_exact_match_rate, \
                 overall_normalized_match_rate = EXCLUDED.overall_normalized_match_rate, \
                 overall_cer = EXCLUDED.overall_cer, \
                 per_field_stats = EXCLUDED.per_field_stats",
        )
        .bind(job_id)
        .bind(to_i32(summary.total_units))
        .bind(to_i32(summary.failed_units))
        .bind(to_i32(summary.compared_fields))
        .bind(summary.overall_exact_match_rate)
        .bind(summary.overall_normalized_match_rate)
        .bind(summary.overall_cer)
        .bind(Json(&summary.per_field_stats))
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find(pool: &PgPool, job_id: JobId) -> Result<Option<SummaryRow>, sqlx::Error> {
        sqlx::query_as::<_, SummaryRow>(
            "SELECT job_id, total_units, failed_units, compared_fields, \
                    overall_exact_match_rate, overall_normalized_match_rate, overall_cer, \
                    per_field_stats, created_at \
             FROM job_summaries WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(pool)
        .await
    }
}

fn to_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}
