//! Handler outcomes
//!
//! Duplicate and stale invocations are not errors; they resolve to
//! `{"ignored": true}` or `{"waiting": true}`.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Result of one coordinator invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Duplicate, stale or poison delivery; nothing was done
    Ignored { reason: String },
    /// Fan-in not complete yet, or another invocation is assembling
    Waiting { completed_groups: u32, total_groups: u32 },
    /// Extraction finished and the fan-out batch was published
    Dispatched { groups: Vec<String> },
    /// Extraction failed unrecoverably; the job is FAILED
    Failed { reason: String },
    /// Group executed and its completion message published
    Executed {
        group: String,
        checks: usize,
        degraded: usize,
    },
    /// This invocation assembled the report; the job is DONE
    Assembled,
}

impl HandlerOutcome {
    pub fn ignored(reason: impl Into<String>) -> Self {
        HandlerOutcome::Ignored {
            reason: reason.into(),
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, HandlerOutcome::Ignored { .. })
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, HandlerOutcome::Waiting { .. })
    }
}

impl Serialize for HandlerOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            HandlerOutcome::Ignored { reason } => {
                map.serialize_entry("ignored", &true)?;
                map.serialize_entry("reason", reason)?;
            }
            HandlerOutcome::Waiting {
                completed_groups,
                total_groups,
            } => {
                map.serialize_entry("waiting", &true)?;
                map.serialize_entry("completed_groups", completed_groups)?;
                map.serialize_entry("total_groups", total_groups)?;
            }
            HandlerOutcome::Dispatched { groups } => {
                map.serialize_entry("dispatched", groups)?;
            }
            HandlerOutcome::Failed { reason } => {
                map.serialize_entry("failed", &true)?;
                map.serialize_entry("reason", reason)?;
            }
            HandlerOutcome::Executed {
                group,
                checks,
                degraded,
            } => {
                map.serialize_entry("executed", group)?;
                map.serialize_entry("checks", checks)?;
                map.serialize_entry("degraded", degraded)?;
            }
            HandlerOutcome::Assembled => {
                map.serialize_entry("assembled", &true)?;
            }
        }
        map.end()
    }
}
