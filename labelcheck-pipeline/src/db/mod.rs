//! Job store, claim ledger and report persistence
//!
//! All shared mutation goes through two primitives: a single-row UPDATE guarded
//! by the expected prior value (checked via `rows_affected()`), and
//! `INSERT ... ON CONFLICT DO NOTHING` (checked the same way). Transactions
//! always open with a write so SQLite never has to upgrade a read lock.

pub mod facts;
pub mod jobs;
pub mod reports;
pub mod unit_records;

use chrono::{DateTime, SecondsFormat, Utc};
use labelcheck_common::db::{init_database, DatabaseOptions};
use labelcheck_common::{Error, Result};
use sqlx::SqlitePool;
use std::path::Path;

/// Open the database file and make sure every table exists
pub async fn open_pool(db_path: &Path, options: &DatabaseOptions) -> Result<SqlitePool> {
    let pool = init_database(db_path, options).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'QUEUED' CHECK (status IN (
                'QUEUED', 'EXTRACTING', 'EXTRACTED', 'COMPLIANCE_STARTED', 'DONE', 'FAILED'
            )),
            total_groups INTEGER NOT NULL CHECK (total_groups > 0),
            completed_groups INTEGER NOT NULL DEFAULT 0
                CHECK (completed_groups >= 0 AND completed_groups <= total_groups),
            counted_groups TEXT NOT NULL DEFAULT '|',
            facts_reference TEXT,
            image_refs TEXT NOT NULL DEFAULT '[]',
            failure_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status_updated ON jobs(status, updated_at)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS unit_records (
            job_id TEXT NOT NULL REFERENCES jobs(job_id),
            unit_name TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('marker', 'check')),
            status TEXT NOT NULL CHECK (status IN ('RUNNING', 'DONE', 'ERROR')),
            payload TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (job_id, unit_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS label_facts (
            facts_reference TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES jobs(job_id),
            facts_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            job_id TEXT PRIMARY KEY REFERENCES jobs(job_id),
            report_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Current time in the stored text format (fixed width, sorts lexicographically)
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_uuid(value: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Invalid job_id {}: {}", value, e)))
}
