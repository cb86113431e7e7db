//! Job store operations
//!
//! Every status change is a single-row UPDATE conditioned on the status the
//! caller expects. Zero affected rows means another invocation already moved
//! the job; callers treat that as a no-op.

use chrono::{DateTime, Utc};
use labelcheck_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{format_ts, now_ts, parse_ts, parse_uuid};
use crate::models::{Job, JobStatus, JobStatusView, LabelFacts};

const JOB_COLUMNS: &str = "job_id, status, total_groups, completed_groups, facts_reference, \
                           image_refs, failure_reason, created_at, updated_at";

/// Insert a new job in QUEUED
pub async fn create_job(
    pool: &SqlitePool,
    job_id: Uuid,
    image_refs: &[String],
    total_groups: u32,
) -> Result<Job> {
    let image_refs_json = serde_json::to_string(image_refs)?;
    let now = now_ts();

    sqlx::query(
        r#"
        INSERT INTO jobs (job_id, status, total_groups, completed_groups, counted_groups,
                          image_refs, created_at, updated_at)
        VALUES (?, 'QUEUED', ?, 0, '|', ?, ?, ?)
        "#,
    )
    .bind(job_id.to_string())
    .bind(i64::from(total_groups))
    .bind(&image_refs_json)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    load_job(pool, job_id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Job {} vanished after insert", job_id)))
}

/// Load a job by id
pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<Job>> {
    let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE job_id = ?", JOB_COLUMNS))
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| row_to_job(&r)).transpose()
}

/// Status summary for request-serving code
pub async fn job_status(pool: &SqlitePool, job_id: Uuid) -> Result<Option<JobStatusView>> {
    Ok(load_job(pool, job_id).await?.as_ref().map(JobStatusView::from))
}

/// Jobs not yet DONE or FAILED
pub async fn count_active(pool: &SqlitePool) -> Result<u64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status NOT IN ('DONE', 'FAILED')")
            .fetch_one(pool)
            .await?;
    Ok(count as u64)
}

/// Move `job_id` from `from` to `to` if it is still in `from`
///
/// Returns false when the job was not in `from` (duplicate or stale invocation).
pub async fn transition(
    pool: &SqlitePool,
    job_id: Uuid,
    from: JobStatus,
    to: JobStatus,
) -> Result<bool> {
    if !from.can_transition_to(to) {
        return Err(Error::InvalidInput(format!(
            "Illegal job transition {} -> {}",
            from, to
        )));
    }

    let result = sqlx::query(
        "UPDATE jobs SET status = ?, updated_at = ? WHERE job_id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(now_ts())
    .bind(job_id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Persist extracted facts and move EXTRACTING → EXTRACTED in one transaction
///
/// The facts insert is insert-if-absent and comes first, so the transaction
/// takes the write lock on its first statement. `facts_reference` is only set
/// while the job is EXTRACTING and still has none.
pub async fn persist_facts_and_mark_extracted(
    pool: &SqlitePool,
    job_id: Uuid,
    facts_reference: &str,
    facts: &LabelFacts,
) -> Result<bool> {
    let facts_json = serde_json::to_string(facts)?;
    let now = now_ts();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO label_facts (facts_reference, job_id, facts_json, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(facts_reference) DO NOTHING
        "#,
    )
    .bind(facts_reference)
    .bind(job_id.to_string())
    .bind(&facts_json)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query(
        r#"
        UPDATE jobs SET status = 'EXTRACTED', facts_reference = ?, updated_at = ?
        WHERE job_id = ? AND status = 'EXTRACTING' AND facts_reference IS NULL
        "#,
    )
    .bind(facts_reference)
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

/// Move a job observed in `from` to FAILED, recording why
pub async fn mark_failed(
    pool: &SqlitePool,
    job_id: Uuid,
    from: JobStatus,
    reason: &str,
) -> Result<bool> {
    if !from.can_transition_to(JobStatus::Failed) {
        return Ok(false);
    }

    let result = sqlx::query(
        r#"
        UPDATE jobs SET status = 'FAILED', failure_reason = ?, updated_at = ?
        WHERE job_id = ? AND status = ?
        "#,
    )
    .bind(reason)
    .bind(now_ts())
    .bind(job_id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Count `group` towards `completed_groups`, at most once per group
///
/// The dedup test and the increment are one statement, so concurrent
/// completions for different groups never lose an update and redelivery of the
/// same completion never double-counts. Returns the new `(completed, total)`
/// when this call did the counting, None when it did not.
pub async fn count_group_completion(
    pool: &SqlitePool,
    job_id: Uuid,
    group: &str,
) -> Result<Option<(u32, u32)>> {
    let row = sqlx::query(
        r#"
        UPDATE jobs
        SET completed_groups = completed_groups + 1,
            counted_groups = counted_groups || ?1 || '|',
            updated_at = ?2
        WHERE job_id = ?3
          AND status = 'COMPLIANCE_STARTED'
          AND completed_groups < total_groups
          AND instr(counted_groups, '|' || ?1 || '|') = 0
        RETURNING completed_groups, total_groups
        "#,
    )
    .bind(group)
    .bind(now_ts())
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| {
        (
            r.get::<i64, _>("completed_groups") as u32,
            r.get::<i64, _>("total_groups") as u32,
        )
    }))
}

/// Groups already counted by the aggregator
pub async fn counted_groups(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<String>> {
    let counted: Option<String> =
        sqlx::query_scalar("SELECT counted_groups FROM jobs WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(pool)
            .await?;

    Ok(counted
        .unwrap_or_default()
        .split('|')
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect())
}

/// Non-terminal jobs not touched since `older_than`
pub async fn find_stalled(
    pool: &SqlitePool,
    older_than: DateTime<Utc>,
) -> Result<Vec<(Uuid, JobStatus)>> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, status FROM jobs
        WHERE status NOT IN ('DONE', 'FAILED') AND updated_at < ?
        ORDER BY updated_at
        "#,
    )
    .bind(format_ts(older_than))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let job_id = parse_uuid(row.get("job_id"))?;
            let status = parse_status(row.get("status"))?;
            Ok((job_id, status))
        })
        .collect()
}

fn parse_status(value: &str) -> Result<JobStatus> {
    value.parse::<JobStatus>().map_err(Error::Internal)
}

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let image_refs: String = row.get("image_refs");
    let image_refs: Vec<String> = serde_json::from_str(&image_refs)?;

    Ok(Job {
        job_id: parse_uuid(row.get("job_id"))?,
        status: parse_status(row.get("status"))?,
        total_groups: row.get::<i64, _>("total_groups") as u32,
        completed_groups: row.get::<i64, _>("completed_groups") as u32,
        facts_reference: row.get("facts_reference"),
        image_refs,
        failure_reason: row.get("failure_reason"),
        created_at: parse_ts("created_at", row.get("created_at"))?,
        updated_at: parse_ts("updated_at", row.get("updated_at"))?,
    })
}
