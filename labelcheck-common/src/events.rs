//! Event types for the labelcheck event system
//!
//! Provides the pipeline event definitions and the broadcast EventBus. Events are
//! advisory: they feed the SSE stream and logs, and no handler depends on them
//! being delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Job moved along its lifecycle
    JobStatusChanged {
        job_id: Uuid,
        old_status: String,
        new_status: String,
        timestamp: DateTime<Utc>,
    },

    /// A group executor won the claim for a group
    GroupClaimed {
        job_id: Uuid,
        group: String,
        timestamp: DateTime<Utc>,
    },

    /// A check exhausted its retries and was recorded as needing review
    CheckDegraded {
        job_id: Uuid,
        check_id: String,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// The aggregator counted a group completion
    GroupCompleted {
        job_id: Uuid,
        group: String,
        completed_groups: u32,
        total_groups: u32,
        timestamp: DateTime<Utc>,
    },

    /// Final report persisted; job is DONE
    ReportAssembled {
        job_id: Uuid,
        total_checks: u32,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::JobStatusChanged { .. } => "JobStatusChanged",
            PipelineEvent::GroupClaimed { .. } => "GroupClaimed",
            PipelineEvent::CheckDegraded { .. } => "CheckDegraded",
            PipelineEvent::GroupCompleted { .. } => "GroupCompleted",
            PipelineEvent::ReportAssembled { .. } => "ReportAssembled",
        }
    }

    /// Job the event belongs to
    pub fn job_id(&self) -> Uuid {
        match self {
            PipelineEvent::JobStatusChanged { job_id, .. }
            | PipelineEvent::GroupClaimed { job_id, .. }
            | PipelineEvent::CheckDegraded { job_id, .. }
            | PipelineEvent::GroupCompleted { job_id, .. }
            | PipelineEvent::ReportAssembled { job_id, .. } => *job_id,
        }
    }
}

/// Broadcast bus for pipeline events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_err_but_lossy_is_silent() {
        let bus = EventBus::new(8);
        let event = PipelineEvent::GroupClaimed {
            job_id: Uuid::new_v4(),
            group: "identity".to_string(),
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 8);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();

        bus.emit(PipelineEvent::ReportAssembled {
            job_id,
            total_checks: 11,
            timestamp: Utc::now(),
        })
        .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "ReportAssembled");
        assert_eq!(received.job_id(), job_id);
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let event = PipelineEvent::GroupCompleted {
            job_id: Uuid::nil(),
            group: "tables".to_string(),
            completed_groups: 2,
            total_groups: 3,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "GroupCompleted");
        assert_eq!(json["group"], "tables");
        assert_eq!(json["completed_groups"], 2);
    }
}
