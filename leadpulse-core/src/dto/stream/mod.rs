//! Wire format of the analysis progress stream
//!
//! Inbound messages are JSON text frames discriminated by a `type` field.
//! The kind set is closed on the client side: a frame whose `type` is not
//! recognized decodes as [`StreamEvent::Unknown`], so a newer backend never
//! breaks an older client.

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobStatus, StepProgress};

/// One inbound frame on the progress stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Stream accepted; an `initial` snapshot follows.
    Ready { timestamp: Option<i64> },
    /// Keep-alive reply to a client ping.
    Pong { timestamp: Option<i64> },
    /// Acknowledgement of a client frame.
    Ack { timestamp: Option<i64> },
    /// State snapshot sent once shortly after subscribe.
    Initial {
        #[serde(rename = "runId")]
        run_id: Option<String>,
        #[serde(default)]
        data: ProgressPayload,
        timestamp: Option<i64>,
    },
    /// Incremental progress update.
    Progress {
        #[serde(rename = "runId")]
        run_id: Option<String>,
        #[serde(default)]
        data: ProgressPayload,
        timestamp: Option<i64>,
    },
    /// Analysis finished successfully.
    Complete {
        #[serde(rename = "runId")]
        run_id: Option<String>,
        #[serde(default)]
        data: ProgressPayload,
        timestamp: Option<i64>,
    },
    /// Analysis failed.
    Failed {
        #[serde(rename = "runId")]
        run_id: Option<String>,
        #[serde(default)]
        data: ProgressPayload,
        timestamp: Option<i64>,
    },
    /// Analysis was cancelled by the user or the backend.
    Cancelled {
        #[serde(rename = "runId")]
        run_id: Option<String>,
        #[serde(default)]
        data: ProgressPayload,
        timestamp: Option<i64>,
    },
    /// Any kind this client build does not know.
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Decode one raw text frame.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Data payload carried by snapshot and lifecycle frames
///
/// Every field is optional on the wire; consumers merge what is present
/// over the state they already hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub step: Option<StepProgress>,
    pub current_step: Option<String>,
    pub lead_id: Option<String>,
    pub avatar_url: Option<String>,
    pub error: Option<String>,
}

/// Outbound frames the client may send on the stream
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Keep-alive probe; the backend answers with `pong`.
    Ping,
}

impl ClientFrame {
    /// Encode for the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
