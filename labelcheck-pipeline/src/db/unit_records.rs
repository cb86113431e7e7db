//! Claim ledger operations
//!
//! `(job_id, unit_name)` is the primary key, so the store itself rejects a
//! second claim. A rejected insert is reported as `Ok(false)`; any other
//! failure propagates.

use labelcheck_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{now_ts, parse_ts, parse_uuid};
use crate::models::{UnitKind, UnitRecord, UnitStatus};

/// Insert a RUNNING record if none exists for `(job_id, unit_name)`
///
/// Returns true only for the single caller whose insert landed.
pub async fn try_claim(
    pool: &SqlitePool,
    job_id: Uuid,
    unit_name: &str,
    kind: UnitKind,
) -> Result<bool> {
    insert_if_absent(pool, job_id, unit_name, kind, UnitStatus::Running).await
}

/// Insert an already-terminal structural marker (e.g. `group-done:<group>`)
pub async fn insert_marker(pool: &SqlitePool, job_id: Uuid, unit_name: &str) -> Result<bool> {
    insert_if_absent(pool, job_id, unit_name, UnitKind::Marker, UnitStatus::Done).await
}

async fn insert_if_absent(
    pool: &SqlitePool,
    job_id: Uuid,
    unit_name: &str,
    kind: UnitKind,
    status: UnitStatus,
) -> Result<bool> {
    let now = now_ts();
    let result = sqlx::query(
        r#"
        INSERT INTO unit_records (job_id, unit_name, kind, status, payload, created_at, updated_at)
        VALUES (?, ?, ?, ?, NULL, ?, ?)
        ON CONFLICT(job_id, unit_name) DO NOTHING
        "#,
    )
    .bind(job_id.to_string())
    .bind(unit_name)
    .bind(kind.as_str())
    .bind(status.as_str())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Close a RUNNING record as DONE or ERROR
///
/// Returns false if the record was not RUNNING; each record is closed once.
pub async fn complete(
    pool: &SqlitePool,
    job_id: Uuid,
    unit_name: &str,
    status: UnitStatus,
    payload: Option<&serde_json::Value>,
) -> Result<bool> {
    if !status.is_terminal() {
        return Err(Error::InvalidInput(format!(
            "Cannot complete {} with status {}",
            unit_name,
            status.as_str()
        )));
    }
    let payload = payload.map(serde_json::to_string).transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE unit_records SET status = ?, payload = ?, updated_at = ?
        WHERE job_id = ? AND unit_name = ? AND status = 'RUNNING'
        "#,
    )
    .bind(status.as_str())
    .bind(payload)
    .bind(now_ts())
    .bind(job_id.to_string())
    .bind(unit_name)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn load(pool: &SqlitePool, job_id: Uuid, unit_name: &str) -> Result<Option<UnitRecord>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, unit_name, kind, status, payload, created_at, updated_at
        FROM unit_records WHERE job_id = ? AND unit_name = ?
        "#,
    )
    .bind(job_id.to_string())
    .bind(unit_name)
    .fetch_optional(pool)
    .await?;

    row.map(|r| row_to_record(&r)).transpose()
}

pub async fn exists(pool: &SqlitePool, job_id: Uuid, unit_name: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM unit_records WHERE job_id = ? AND unit_name = ?",
    )
    .bind(job_id.to_string())
    .bind(unit_name)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Every check record for a job, ordered by check id
pub async fn load_check_records(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<UnitRecord>> {
    load_where(pool, job_id, Some(UnitKind::Check)).await
}

/// Every record for a job (markers and checks), ordered by unit name
pub async fn list_for_job(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<UnitRecord>> {
    load_where(pool, job_id, None).await
}

async fn load_where(
    pool: &SqlitePool,
    job_id: Uuid,
    kind: Option<UnitKind>,
) -> Result<Vec<UnitRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, unit_name, kind, status, payload, created_at, updated_at
        FROM unit_records
        WHERE job_id = ? AND (? IS NULL OR kind = ?)
        ORDER BY unit_name
        "#,
    )
    .bind(job_id.to_string())
    .bind(kind.map(|k| k.as_str()))
    .bind(kind.map(|k| k.as_str()))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_record).collect()
}

fn row_to_record(row: &SqliteRow) -> Result<UnitRecord> {
    let payload: Option<String> = row.get("payload");
    let payload = payload
        .map(|p| serde_json::from_str::<serde_json::Value>(&p))
        .transpose()?;

    Ok(UnitRecord {
        job_id: parse_uuid(row.get("job_id"))?,
        unit_name: row.get("unit_name"),
        kind: row
            .get::<&str, _>("kind")
            .parse::<UnitKind>()
            .map_err(Error::Internal)?,
        status: row
            .get::<&str, _>("status")
            .parse::<UnitStatus>()
            .map_err(Error::Internal)?,
        payload,
        created_at: parse_ts("created_at", row.get("created_at"))?,
        updated_at: parse_ts("updated_at", row.get("updated_at"))?,
    })
}
