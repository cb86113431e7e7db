//! Collaborator call errors

use std::time::Duration;
use thiserror::Error;

/// Failure of a call to an external collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Call exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Service answered with a non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// Service is not configured or refused the input permanently
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Timeouts, network failures, 5xx and 429 are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Timeout(_) | ServiceError::Network(_) => true,
            ServiceError::Api { status, .. } => *status >= 500 || *status == 429,
            ServiceError::Parse(_) | ServiceError::Unavailable(_) => false,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            ServiceError::Parse(err.to_string())
        } else {
            ServiceError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ServiceError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ServiceError::Network("reset".into()).is_retryable());
        assert!(ServiceError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(ServiceError::Api { status: 429, message: String::new() }.is_retryable());
        assert!(!ServiceError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!ServiceError::Parse("bad json".into()).is_retryable());
        assert!(!ServiceError::Unavailable("no endpoint".into()).is_retryable());
    }
}
