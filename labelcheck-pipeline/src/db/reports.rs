//! Report persistence

use labelcheck_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::now_ts;
use crate::models::Report;

/// Persist the report and move COMPLIANCE_STARTED → DONE atomically
///
/// The job must have every group counted. Returns false, leaving nothing
/// written, if a report already exists or the job is not ready.
pub async fn finalize_report(pool: &SqlitePool, job_id: Uuid, report: &Report) -> Result<bool> {
    let report_json = serde_json::to_string(report)?;
    let now = now_ts();
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO reports (job_id, report_json, created_at) VALUES (?, ?, ?)
        ON CONFLICT(job_id) DO NOTHING
        "#,
    )
    .bind(job_id.to_string())
    .bind(&report_json)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() != 1 {
        tx.rollback().await?;
        return Ok(false);
    }

    let updated = sqlx::query(
        r#"
        UPDATE jobs SET status = 'DONE', updated_at = ?
        WHERE job_id = ? AND status = 'COMPLIANCE_STARTED'
          AND completed_groups = total_groups
        "#,
    )
    .bind(&now)
    .bind(job_id.to_string())
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() != 1 {
        tx.rollback().await?;
        return Ok(false);
    }

    tx.commit().await?;
    Ok(true)
}

/// Load the report; None until the job is DONE
pub async fn load_report(pool: &SqlitePool, job_id: Uuid) -> Result<Option<Report>> {
    let json: Option<String> = sqlx::query_scalar(
        r#"
        SELECT r.report_json FROM reports r
        JOIN jobs j ON j.job_id = r.job_id
        WHERE r.job_id = ? AND j.status = 'DONE'
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(json
        .map(|j| serde_json::from_str::<Report>(&j))
        .transpose()?)
}
