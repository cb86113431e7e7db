//! Transport message bodies
//!
//! Every message is safe to deliver more than once and in any order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Object-storage trigger: the upload for `job_id` is complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTrigger {
    pub job_id: Uuid,
}

/// One per evaluation group, emitted after extraction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FanOutMessage {
    pub job_id: Uuid,
    pub group_name: String,
    pub facts_reference: String,
}

/// One per group, emitted after the group's checks all have terminal records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub job_id: Uuid,
    pub group_name: String,
}
