//! Job lifecycle state machine
//!
//! QUEUED → EXTRACTING → EXTRACTED → COMPLIANCE_STARTED → DONE,
//! with FAILED reachable from any non-terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created at upload time, waiting for the upload trigger
    Queued,
    /// Extraction claimed and in flight
    Extracting,
    /// Facts persisted, fan-out dispatched
    Extracted,
    /// At least one group executor has claimed its group
    ComplianceStarted,
    /// Report assembled
    Done,
    /// Unrecoverable failure; no report will ever exist
    Failed,
}

impl JobStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Extracting => "EXTRACTING",
            JobStatus::Extracted => "EXTRACTED",
            JobStatus::ComplianceStarted => "COMPLIANCE_STARTED",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }

    /// DONE and FAILED never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Position along the forward path; FAILED sits outside it
    fn rank(&self) -> Option<u8> {
        match self {
            JobStatus::Queued => Some(0),
            JobStatus::Extracting => Some(1),
            JobStatus::Extracted => Some(2),
            JobStatus::ComplianceStarted => Some(3),
            JobStatus::Done => Some(4),
            JobStatus::Failed => None,
        }
    }

    /// Legal single-step transitions of the lifecycle graph
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == JobStatus::Failed {
            return true;
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }

    /// True when `self` is at or beyond `other` on the forward path
    pub fn has_reached(&self, other: JobStatus) -> bool {
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a >= b,
            _ => *self == other,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "EXTRACTING" => Ok(JobStatus::Extracting),
            "EXTRACTED" => Ok(JobStatus::Extracted),
            "COMPLIANCE_STARTED" => Ok(JobStatus::ComplianceStarted),
            "DONE" => Ok(JobStatus::Done),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Durable job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total_groups: u32,
    pub completed_groups: u32,
    /// Pointer to the persisted facts; set once on EXTRACTING → EXTRACTED
    pub facts_reference: Option<String>,
    /// Uploaded image object references consumed by extraction
    pub image_refs: Vec<String>,
    /// Set only when the job moves to FAILED
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status summary exposed to request-serving code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub completed_groups: u32,
    pub total_groups: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            completed_groups: job.completed_groups,
            total_groups: job.total_groups,
            failure_reason: job.failure_reason.clone(),
        }
    }
}
