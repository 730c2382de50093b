//! Error types for the sync module.

use thiserror::Error;

use monetus_sync_core::CoreError;
use monetus_sync_store::StoreError;

use crate::rendezvous::RendezvousId;

/// Errors that can occur during sync operations.
///
/// Every variant is terminal for the session it happens in; recovery is a
/// fresh session started by the user.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport could not open, the dial failed, or no identifier could be acquired.
    #[error("could not connect: {0}")]
    Connection(String),

    /// The rendezvous backend already has an endpoint under this identifier.
    #[error("rendezvous identifier {0} is unavailable")]
    IdentifierUnavailable(RendezvousId),

    /// A typed rendezvous code could not be parsed.
    #[error("invalid rendezvous identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A message could not be transmitted.
    #[error("send failed: {0}")]
    Send(String),

    /// A snapshot failed validation or could not be merged.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// The peer reported that it could not process our data.
    #[error("peer error: {0}")]
    RemoteReported(String),

    /// The connection closed or failed before the session succeeded.
    #[error("connection interrupted")]
    Interrupted,

    /// Timeout waiting for peer.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Local data could not be put into wire form.
    #[error("could not encode local data: {0}")]
    Encoding(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Local storage failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A session is already connecting or syncing.
    #[error("a sync session is already active")]
    SessionActive,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl From<CoreError> for SyncError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSnapshot(msg) => SyncError::InvalidSnapshot(msg),
            CoreError::Encoding(msg) => SyncError::Encoding(msg),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_keep_their_side() {
        let remote = SyncError::from(CoreError::InvalidSnapshot("missing categories".into()));
        assert!(matches!(remote, SyncError::InvalidSnapshot(_)));

        let local = SyncError::from(CoreError::Encoding("amount is not finite".into()));
        assert!(matches!(local, SyncError::Encoding(_)));
        assert_eq!(local.to_string(), "could not encode local data: amount is not finite");
    }
}
