//! JSON-lines wire format for `acquireq serve`.
//!
//! Requests are one JSON object per line, tagged by `op`:
//!
//! ```json
//! {"op":"create","name":"printer","offerDurationSeconds":30}
//! {"op":"join","resourceId":"…","label":"alice"}
//! {"op":"accept","resourceId":"…","claimantId":1}
//! {"op":"subscribe","resourceId":"…"}
//! ```
//!
//! Every request gets exactly one `{"ok":…}` or `{"error":…}` line back.
//! Subscribed resources additionally stream `{"snapshot":…}` lines.

use acquireq_core::{ClaimantId, CreatedResource, RecoveryReport, ResourceId, Snapshot};
use serde::{Deserialize, Serialize};

/// An inbound operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    Create {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default, rename = "offerDurationSeconds")]
        offer_duration_secs: Option<u32>,
    },
    Join {
        resource_id: ResourceId,
        label: String,
        #[serde(default)]
        contact: Option<String>,
        #[serde(default)]
        claimant_id: Option<ClaimantId>,
    },
    Release {
        resource_id: ResourceId,
        claimant_id: ClaimantId,
    },
    Accept {
        resource_id: ResourceId,
        claimant_id: ClaimantId,
    },
    Reject {
        resource_id: ResourceId,
        claimant_id: ClaimantId,
    },
    Leave {
        resource_id: ResourceId,
        claimant_id: ClaimantId,
    },
    Status {
        resource_id: ResourceId,
    },
    Subscribe {
        resource_id: ResourceId,
    },
    Sweep,
}

/// Successful result of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Created(CreatedResource),
    #[serde(rename_all = "camelCase")]
    Joined {
        claimant_id: ClaimantId,
    },
    /// Contention outcomes report `applied: false`
    Applied {
        applied: bool,
    },
    Status(Snapshot),
    #[serde(rename_all = "camelCase")]
    Subscribed {
        resource_id: ResourceId,
    },
    Swept {
        expired: usize,
    },
    Recovered(RecoveryReport),
}

/// Error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    /// True for store and system faults, false for caller mistakes
    pub infrastructure: bool,
}

impl From<&acquireq_core::Error> for ErrorBody {
    fn from(err: &acquireq_core::Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            infrastructure: err.is_infrastructure(),
        }
    }
}

impl ErrorBody {
    /// A line that could not be decoded as a request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
            infrastructure: false,
        }
    }
}

/// One output line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Line {
    Ok(Outcome),
    Error(ErrorBody),
    Snapshot(Snapshot),
}

impl Line {
    /// Render as a single line of JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| encode_failure(&e.to_string()))
    }
}

/// Error line for a value that could not be encoded
fn encode_failure(message: &str) -> String {
    serde_json::json!({
        "error": {
            "code": "ENCODE_ERROR",
            "message": message,
            "infrastructure": true,
        }
    })
    .to_string()
}
