//! Repository for the `unit_results` table.

use labelbench_core::types::JobId;
use sqlx::PgPool;

use crate::models::unit::{NewUnitRecord, UnitRecord};

const COLUMNS: &str = "\
    id, job_id, unit_index, unit_name, detections, predictions, comparisons, \
    processing_time_ms, error_message, created_at";

pub struct UnitResultRepo;

impl UnitResultRepo {
    /// Insert or replace the result for `(job_id, unit_index)`.
    pub async fn upsert(pool: &PgPool, unit: &NewUnitRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO unit_results \
                 (job_id, unit_index, unit_name, detections, predictions, comparisons, \
                  processing_time_ms, error_message) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (job_id, unit_index) DO UPDATE SET \
                 unit_name = EXCLUDED.unit_name, \
                 detections = EXCLUDED.detections, \
                 predictions = EXCLUDED.predictions, \
                 comparisons = EXCLUDED.comparisons, \
                 processing_time_ms = EXCLUDED.processing_time_ms, \
                 error_message = EXCLUDED.error_message",
        )
        .bind(unit.job_id)
        .bind(unit.unit_index)
        .bind(&unit.unit_name)
        .bind(&unit.detections)
        .bind(&unit.predictions)
        .bind(&unit.comparisons)
        .bind(unit.processing_time_ms)
        .bind(unit.error_message.as_deref())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_job(pool: &PgPool, job_id: JobId) -> Result<Vec<UnitRecord>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM unit_results WHERE job_id = $1 ORDER BY unit_index ASC"
        );
        sqlx::query_as::<_, UnitRecord>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
