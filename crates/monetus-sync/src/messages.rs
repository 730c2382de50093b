//! Sync protocol message types.
//!
//! Messages travel as JSON objects tagged by `type`:
//!
//! ```text
//! { "type": "SYNC_REQUEST",  "payload": { "transactions": [..], "categories": [..], "goals": [..] } }
//! { "type": "SYNC_RESPONSE", "payload": { .. } }
//! { "type": "SYNC_ERROR",    "message": "..." }
//! ```
//!
//! There is no version field; both endpoints run the same protocol revision.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use monetus_sync_core::{Snapshot, SnapshotPayload};

use crate::error::Result;

/// Sent to the peer when its payload could not be merged here.
pub const MERGE_REJECTED_BY_PEER: &str = "failed to process data on the receiving device";

/// Shown when a `SYNC_ERROR` arrives without a message.
pub const UNKNOWN_REMOTE_ERROR: &str = "unknown remote error";

/// Sync protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    /// The Host's full data offer. Sent exactly once per session.
    SyncRequest {
        #[serde(default)]
        payload: SnapshotPayload,
    },

    /// The Joiner's post-merge data, sent back once.
    SyncResponse {
        #[serde(default)]
        payload: SnapshotPayload,
    },

    /// The sender could not process a prior message.
    SyncError {
        #[serde(default)]
        message: String,
    },
}

impl SyncMessage {
    /// Build a request carrying `snapshot`.
    pub fn request(snapshot: &Snapshot) -> Result<Self> {
        Ok(SyncMessage::SyncRequest {
            payload: snapshot.to_payload()?,
        })
    }

    /// Build a response carrying `snapshot`.
    pub fn response(snapshot: &Snapshot) -> Result<Self> {
        Ok(SyncMessage::SyncResponse {
            payload: snapshot.to_payload()?,
        })
    }

    /// Build an error message.
    pub fn error(message: impl Into<String>) -> Self {
        SyncMessage::SyncError {
            message: message.into(),
        }
    }

    /// The wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::SyncRequest { .. } => "SYNC_REQUEST",
            SyncMessage::SyncResponse { .. } => "SYNC_RESPONSE",
            SyncMessage::SyncError { .. } => "SYNC_ERROR",
        }
    }

    /// Encode to a JSON frame.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode a JSON frame.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(frame)?)
    }
}
