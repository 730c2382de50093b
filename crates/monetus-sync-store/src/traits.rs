//! SyncStore trait: the data collaborator seen by the sync protocol.
//!
//! Everything else about how finance data is stored or rendered is
//! irrelevant to sync. Implementations include SQLite (primary) and
//! in-memory (for tests).

use async_trait::async_trait;
use monetus_sync_core::{Snapshot, SnapshotPayload};

use crate::error::Result;

/// Async interface for snapshot reads and merge-and-commit.
///
/// # Design Notes
///
/// - `get_sync_data` has no side effects.
/// - `merge_sync_data` is atomic from the caller's perspective: all three
///   collections are updated, or none are.
/// - A payload that fails validation yields `Ok(false)` and leaves local
///   state unchanged. `Err` means the backend itself failed.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Read the full local snapshot.
    async fn get_sync_data(&self) -> Result<Snapshot>;

    /// Merge a remote payload into local state, remote winning on id
    /// collision, and commit the result.
    ///
    /// # Returns
    /// - `Ok(true)` if the merged state was committed.
    /// - `Ok(false)` if the payload was structurally invalid.
    async fn merge_sync_data(&self, remote: &SnapshotPayload) -> Result<bool>;
}
