//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: record builders and a pair of
//! simulated devices on one in-memory network.

use std::sync::Arc;
use std::time::Duration;

use monetus_sync::{
    MemoryNetwork, MemoryTransport, RendezvousId, SessionController, SessionStatus, SyncConfig,
};
use monetus_sync_core::{
    CategoryRecord, EntryKind, GoalRecord, RecordId, Snapshot, SnapshotPayload, TransactionRecord,
};
use monetus_sync_store::{MemoryStore, SyncStore};

/// An expense transaction in the default expense category.
pub fn transaction(id: &str, amount: f64, date: &str) -> TransactionRecord {
    TransactionRecord {
        id: RecordId::new(id),
        description: format!("Lançamento {}", id),
        merchant: None,
        amount,
        date: date.to_string(),
        kind: EntryKind::Expense,
        category_id: RecordId::new("exp-27"),
        receipt_url: None,
        is_gemini_parsed: None,
    }
}

/// An income transaction in the salary category.
pub fn income(id: &str, amount: f64, date: &str) -> TransactionRecord {
    TransactionRecord {
        kind: EntryKind::Income,
        category_id: RecordId::new("inc-13"),
        ..transaction(id, amount, date)
    }
}

/// An expense category.
pub fn category(id: &str, name: &str) -> CategoryRecord {
    CategoryRecord {
        id: RecordId::new(id),
        name: name.to_string(),
        icon: "Tag".to_string(),
        color: "bg-gray-100 text-gray-700".to_string(),
        kind: EntryKind::Expense,
    }
}

/// A savings goal without a deadline.
pub fn goal(id: &str, target_amount: f64) -> GoalRecord {
    GoalRecord {
        id: RecordId::new(id),
        target_amount,
        category_id: RecordId::new("inc-13"),
        deadline: None,
    }
}

/// A snapshot with the given transactions and categories and no goals.
pub fn snapshot(transactions: Vec<TransactionRecord>, categories: Vec<CategoryRecord>) -> Snapshot {
    Snapshot {
        transactions,
        categories,
        goals: Vec::new(),
    }
}

/// A payload carrying transactions but no `categories` field.
pub fn payload_without_categories(transactions: &[TransactionRecord]) -> SnapshotPayload {
    SnapshotPayload {
        transactions: serde_json::to_value(transactions).ok(),
        categories: None,
        goals: None,
    }
}

/// Timings short enough for tests.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        close_grace: Duration::from_millis(20),
        message_timeout: Duration::from_secs(5),
        ..SyncConfig::default()
    }
}

/// Install a tracing subscriber that writes through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// One simulated device: a store and the controller that syncs it.
pub struct TestDevice<S: SyncStore + 'static = MemoryStore> {
    pub store: Arc<S>,
    pub controller: SessionController<MemoryTransport, S>,
}

impl TestDevice<MemoryStore> {
    /// A device on `network` holding `data`.
    pub fn new(network: &Arc<MemoryNetwork>, data: Snapshot) -> Self {
        Self::with_store(network, Arc::new(MemoryStore::with_snapshot(data)))
    }
}

impl<S: SyncStore + 'static> TestDevice<S> {
    /// A device on `network` backed by `store`.
    pub fn with_store(network: &Arc<MemoryNetwork>, store: Arc<S>) -> Self {
        Self::with_config(network, store, fast_config())
    }

    /// A device on `network` backed by `store`, syncing with `config`.
    pub fn with_config(network: &Arc<MemoryNetwork>, store: Arc<S>, config: SyncConfig) -> Self {
        let controller =
            SessionController::new(Arc::new(network.transport()), Arc::clone(&store), config);
        Self { store, controller }
    }

    /// Current local data.
    pub async fn data(&self) -> Snapshot {
        match self.store.get_sync_data().await {
            Ok(snapshot) => snapshot,
            Err(e) => panic!("test store unreadable: {}", e),
        }
    }
}

/// Two devices on a fresh network.
pub fn device_pair(host: Snapshot, joiner: Snapshot) -> (Arc<MemoryNetwork>, TestDevice, TestDevice) {
    let network = MemoryNetwork::new();
    let host = TestDevice::new(&network, host);
    let joiner = TestDevice::new(&network, joiner);
    (network, host, joiner)
}

/// Start `host` and wait until it publishes its rendezvous code.
pub async fn host_code<S: SyncStore + 'static>(host: &mut TestDevice<S>) -> RendezvousId {
    let mut rx = host.controller.subscribe();
    if let Err(e) = host.controller.start_as_host() {
        panic!("host failed to start: {}", e);
    }

    let status = match rx
        .wait_for(|s| s.rendezvous.is_some() || s.is_settled())
        .await
    {
        Ok(status) => status.clone(),
        Err(e) => panic!("status channel closed: {}", e),
    };
    match status.rendezvous {
        Some(code) => code,
        None => panic!("host settled without a code: {:?}", status.error),
    }
}

/// Run one full session between two devices and return both final statuses.
pub async fn run_sync<S: SyncStore + 'static>(
    host: &mut TestDevice<S>,
    joiner: &mut TestDevice<S>,
) -> (SessionStatus, SessionStatus) {
    let code = host_code(host).await;
    if let Err(e) = joiner.controller.start_as_join(code.as_str()) {
        panic!("joiner failed to start: {}", e);
    }

    let joiner_status = joiner.controller.wait_until_settled().await;
    let host_status = host.controller.wait_until_settled().await;
    (host_status, joiner_status)
}
