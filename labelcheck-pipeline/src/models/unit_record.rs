//! Claim ledger records
//!
//! One row per `(job_id, unit_name)`. Structural markers deduplicate handler
//! steps; check records carry per-check results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Marker claimed by the single invocation allowed to assemble the report
pub const REPORT_CLAIM: &str = "report-claim";

/// Marker claimed by the single invocation allowed to execute `group`
pub fn group_claim(group: &str) -> String {
    format!("group-claim:{}", group)
}

/// Marker recording that every check of `group` reached a terminal record
pub fn group_done(group: &str) -> String {
    format!("group-done:{}", group)
}

/// Record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnitStatus {
    Running,
    Done,
    Error,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Running => "RUNNING",
            UnitStatus::Done => "DONE",
            UnitStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnitStatus::Running)
    }
}

impl FromStr for UnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(UnitStatus::Running),
            "DONE" => Ok(UnitStatus::Done),
            "ERROR" => Ok(UnitStatus::Error),
            other => Err(format!("unknown unit status: {}", other)),
        }
    }
}

/// Whether a record is a structural marker or a check result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Marker,
    Check,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Marker => "marker",
            UnitKind::Check => "check",
        }
    }
}

impl FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "marker" => Ok(UnitKind::Marker),
            "check" => Ok(UnitKind::Check),
            other => Err(format!("unknown unit kind: {}", other)),
        }
    }
}

/// Claim/result record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub job_id: Uuid,
    pub unit_name: String,
    pub kind: UnitKind,
    pub status: UnitStatus,
    /// Result body; None while RUNNING
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_names() {
        assert_eq!(group_claim("identity"), "group-claim:identity");
        assert_eq!(group_done("tables"), "group-done:tables");
        assert_eq!(REPORT_CLAIM, "report-claim");
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("DONE".parse::<UnitStatus>().unwrap(), UnitStatus::Done);
        assert!("done".parse::<UnitStatus>().is_err());
        assert!(!UnitStatus::Running.is_terminal());
        assert!(UnitStatus::Error.is_terminal());
    }
}
