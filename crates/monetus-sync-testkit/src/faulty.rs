//! A store whose merges can be made to fail.

use std::sync::Mutex;

use async_trait::async_trait;

use monetus_sync_core::{Snapshot, SnapshotPayload};
use monetus_sync_store::{MemoryStore, Result, StoreError, SyncStore};

/// How [`FaultyStore::merge_sync_data`] behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Delegate to the in-memory store.
    None,
    /// Treat every payload as invalid (`Ok(false)`).
    Reject,
    /// Fail as a broken backend would (`Err`).
    Fail,
}

/// In-memory store with an injectable merge fault. Reads always work.
pub struct FaultyStore {
    inner: MemoryStore,
    fault: Mutex<Fault>,
}

impl FaultyStore {
    pub fn new(data: Snapshot, fault: Fault) -> Self {
        Self {
            inner: MemoryStore::with_snapshot(data),
            fault: Mutex::new(fault),
        }
    }

    pub fn set_fault(&self, fault: Fault) {
        if let Ok(mut f) = self.fault.lock() {
            *f = fault;
        }
    }

    fn fault(&self) -> Fault {
        self.fault.lock().map(|f| *f).unwrap_or(Fault::Fail)
    }
}

#[async_trait]
impl SyncStore for FaultyStore {
    async fn get_sync_data(&self) -> Result<Snapshot> {
        self.inner.get_sync_data().await
    }

    async fn merge_sync_data(&self, remote: &SnapshotPayload) -> Result<bool> {
        match self.fault() {
            Fault::None => self.inner.merge_sync_data(remote).await,
            Fault::Reject => Ok(false),
            Fault::Fail => Err(StoreError::Poisoned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{snapshot, transaction};

    #[tokio::test]
    async fn test_faults_leave_data_untouched() {
        let data = snapshot(vec![transaction("t1", 50.0, "2024-02-01")], vec![]);
        let store = FaultyStore::new(data.clone(), Fault::Reject);
        let payload = Snapshot::default().to_payload().unwrap();

        assert!(!store.merge_sync_data(&payload).await.unwrap());
        store.set_fault(Fault::Fail);
        assert!(matches!(
            store.merge_sync_data(&payload).await,
            Err(StoreError::Poisoned)
        ));
        assert_eq!(store.get_sync_data().await.unwrap(), data);

        store.set_fault(Fault::None);
        assert!(store.merge_sync_data(&payload).await.unwrap());
    }
}
