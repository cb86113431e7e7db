//! Database initialization
//!
//! Opens (creating if needed) the SQLite file backing the job store and claim ledger.
//! Schema creation is owned by the service crate; this module only configures the pool.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Pool tuning knobs
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Maximum pooled connections
    pub max_connections: u32,
    /// Minimum idle connections kept open
    pub min_connections: u32,
    /// How long a statement waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 20,
            min_connections: 2,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Initialize database connection pool, creating the file if it doesn't exist
///
/// Every pooled connection gets WAL journaling, foreign keys and the busy timeout,
/// so concurrent handler invocations serialize on SQLite's write lock instead of
/// failing immediately.
pub async fn init_database(db_path: &Path, options: &DatabaseOptions) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(options.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .min_connections(options.min_connections)
        .connect_with(connect_options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    Ok(pool)
}
