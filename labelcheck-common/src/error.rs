//! Common error types for the label compliance services

use thiserror::Error;

/// Common result type for labelcheck operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across labelcheck crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the store rejected the operation because another writer held the lock.
    ///
    /// These are the only errors worth retrying locally; everything else goes back
    /// to the caller (and, for transport deliveries, to the transport for redelivery).
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_not_lock_contention() {
        assert!(!Error::Internal("database is locked".to_string()).is_lock_contention());
        assert!(!Error::NotFound("job".to_string()).is_lock_contention());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::Config("missing bind address".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing bind address");
    }
}
