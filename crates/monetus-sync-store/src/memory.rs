//! In-memory implementation of the SyncStore trait.
//!
//! This is primarily for testing. It has the same merge semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::sync::RwLock;

use async_trait::async_trait;
use monetus_sync_core::{merge, Snapshot, SnapshotPayload};

use crate::error::{Result, StoreError};
use crate::traits::SyncStore;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<Snapshot>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot::default())
    }

    /// Create a store holding the given snapshot.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn get_sync_data(&self) -> Result<Snapshot> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.clone())
    }

    async fn merge_sync_data(&self, remote: &SnapshotPayload) -> Result<bool> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        match merge(&inner, remote) {
            Ok(merged) => {
                *inner = merged;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("rejected sync payload: {}", e);
                Ok(false)
            }
        }
    }
}
