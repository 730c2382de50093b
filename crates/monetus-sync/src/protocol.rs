//! Sync protocol state machine.
//!
//! Two messages per session at most. The Host offers its snapshot, the
//! Joiner merges it and answers with its post-merge snapshot, the Host
//! merges that. Both sides then hold the union.

use std::time::Duration;

use monetus_sync_core::{SnapshotCounts, SnapshotPayload};
use monetus_sync_store::SyncStore;

use crate::convergence::{fingerprint, Fingerprint};
use crate::error::{Result, SyncError};
use crate::messages::{SyncMessage, MERGE_REJECTED_BY_PEER, UNKNOWN_REMOTE_ERROR};
use crate::transport::Connection;

/// Which side of the exchange this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends its data first.
    Host,
    /// Dials the host and replies with its merged data.
    Joiner,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Joiner => f.write_str("joiner"),
        }
    }
}

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long to keep the connection after success so in-flight frames land.
    pub close_grace: Duration,
    /// Timeout for each wait on the peer once the connection is open.
    pub message_timeout: Duration,
    /// Length of the short rendezvous code a host asks for first.
    pub short_code_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            close_grace: Duration::from_secs(1),
            message_timeout: Duration::from_secs(30),
            short_code_len: 6,
        }
    }
}

/// Result of a completed sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// The role this endpoint played.
    pub role: Role,
    /// Protocol messages sent to the peer.
    pub messages_sent: usize,
    /// Protocol messages received from the peer.
    pub messages_received: usize,
    /// Record counts in the snapshot the peer sent us.
    pub received: SnapshotCounts,
    /// Record counts held locally after the final merge.
    pub merged: SnapshotCounts,
    /// Fingerprint of the local data after the final merge.
    pub fingerprint: Option<Fingerprint>,
}

impl SyncReport {
    fn new(role: Role) -> Self {
        Self {
            role,
            messages_sent: 0,
            messages_received: 0,
            received: SnapshotCounts::default(),
            merged: SnapshotCounts::default(),
            fingerprint: None,
        }
    }
}

/// Protocol progress after handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Waiting for the next message.
    Syncing,
    /// This endpoint's part of the exchange is complete.
    Success,
}

/// Drives one sync exchange over a connection it does not own.
///
/// Handlers are called one at a time; each merge-and-reply completes before
/// the next message is looked at.
pub struct SyncProtocol<'a, S: SyncStore + ?Sized> {
    role: Role,
    store: &'a S,
    config: &'a SyncConfig,
    report: SyncReport,
}

impl<'a, S: SyncStore + ?Sized> SyncProtocol<'a, S> {
    /// Create a protocol instance for `role`.
    pub fn new(role: Role, store: &'a S, config: &'a SyncConfig) -> Self {
        Self {
            role,
            store,
            config,
            report: SyncReport::new(role),
        }
    }

    /// The report accumulated so far.
    pub fn report(&self) -> &SyncReport {
        &self.report
    }

    /// Run the whole session: [`exchange`](Self::exchange), then [`linger`](Self::linger).
    pub async fn run<C: Connection + ?Sized>(mut self, conn: &C) -> Result<SyncReport> {
        let report = self.exchange(conn).await?;
        self.linger(conn).await?;
        Ok(report)
    }

    /// Open, handle messages until this side's part is done, and report.
    ///
    /// Returns [`SyncError::Interrupted`] if the connection closes before
    /// success and [`SyncError::Timeout`] if the peer goes quiet. The
    /// connection is left open for [`linger`](Self::linger).
    pub async fn exchange<C: Connection + ?Sized>(&mut self, conn: &C) -> Result<SyncReport> {
        tracing::info!("sync connection open as {}", self.role);

        let mut progress = self.on_open(conn).await?;

        while progress == Progress::Syncing {
            let next = tokio::time::timeout(self.config.message_timeout, conn.recv())
                .await
                .map_err(|_| SyncError::Timeout("waiting for peer message".into()))?;

            match next {
                Some(Ok(message)) => progress = self.on_message(conn, message).await?,
                Some(Err(e)) => tracing::warn!("ignoring undecodable frame: {}", e),
                None => return Err(SyncError::Interrupted),
            }
        }

        let local = self.store.get_sync_data().await?;
        self.report.merged = local.counts();
        self.report.fingerprint = Some(fingerprint(&local)?);

        tracing::info!(
            "sync finished as {}: holding {}",
            self.role,
            self.report.merged
        );
        Ok(self.report.clone())
    }

    /// Handle the connection opening. The Host sends its offer; the Joiner waits.
    pub async fn on_open<C: Connection + ?Sized>(&mut self, conn: &C) -> Result<Progress> {
        if self.role == Role::Host {
            let local = self.store.get_sync_data().await?;
            tracing::debug!("offering {}", local.counts());
            self.send(conn, &SyncMessage::request(&local)?).await?;
        }
        Ok(Progress::Syncing)
    }

    /// Handle one message from the peer.
    pub async fn on_message<C: Connection + ?Sized>(
        &mut self,
        conn: &C,
        message: SyncMessage,
    ) -> Result<Progress> {
        self.report.messages_received += 1;
        tracing::debug!("received {}", message.kind());

        match message {
            SyncMessage::SyncRequest { payload } => {
                self.merge_remote(conn, &payload).await?;

                let merged = self.store.get_sync_data().await?;
                self.send(conn, &SyncMessage::response(&merged)?).await?;

                match self.role {
                    Role::Joiner => Ok(Progress::Success),
                    Role::Host => Ok(Progress::Syncing),
                }
            }
            SyncMessage::SyncResponse { payload } => {
                self.merge_remote(conn, &payload).await?;
                Ok(Progress::Success)
            }
            SyncMessage::SyncError { message } => Err(remote_error(message)),
        }
    }

    /// Merge and commit a remote payload, telling the peer if that failed.
    async fn merge_remote<C: Connection + ?Sized>(
        &mut self,
        conn: &C,
        payload: &SnapshotPayload,
    ) -> Result<()> {
        self.report.received = payload.counts();

        let err = match self.store.merge_sync_data(payload).await {
            Ok(true) => return Ok(()),
            Ok(false) => SyncError::InvalidSnapshot(format!(
                "failed to process data received from peer ({} side)",
                self.role
            )),
            Err(e) => SyncError::Store(e),
        };

        if conn.is_open() {
            if let Err(e) = conn.send(&SyncMessage::error(MERGE_REJECTED_BY_PEER)).await {
                tracing::warn!("could not report merge failure to peer: {}", e);
            } else {
                self.report.messages_sent += 1;
            }
        }

        Err(err)
    }

    async fn send<C: Connection + ?Sized>(&mut self, conn: &C, message: &SyncMessage) -> Result<()> {
        conn.send(message).await?;
        self.report.messages_sent += 1;
        Ok(())
    }

    /// Keep the connection for the grace period or until the peer closes.
    ///
    /// Late requests and responses are dropped. A `SYNC_ERROR` still fails
    /// the session: the peer could not use what we sent.
    pub async fn linger<C: Connection + ?Sized>(&self, conn: &C) -> Result<()> {
        let drain = async {
            while let Some(frame) = conn.recv().await {
                match frame {
                    Ok(SyncMessage::SyncError { message }) => return Err(remote_error(message)),
                    Ok(message) => tracing::debug!("ignoring {} after success", message.kind()),
                    Err(e) => tracing::debug!("ignoring frame after success: {}", e),
                }
            }
            Ok(())
        };
        tokio::time::timeout(self.config.close_grace, drain)
            .await
            .unwrap_or(Ok(()))
    }
}

fn remote_error(message: String) -> SyncError {
    let message = if message.is_empty() {
        UNKNOWN_REMOTE_ERROR.to_string()
    } else {
        message
    };
    tracing::warn!("peer reported error: {}", message);
    SyncError::RemoteReported(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryConnection;
    use monetus_sync_core::Snapshot;
    use monetus_sync_store::MemoryStore;
    use serde_json::json;

    fn config() -> SyncConfig {
        SyncConfig {
            close_grace: Duration::from_millis(10),
            message_timeout: Duration::from_millis(500),
            ..SyncConfig::default()
        }
    }

    fn store_with(transactions: serde_json::Value) -> MemoryStore {
        let snapshot: Snapshot = serde_json::from_value(json!({
            "transactions": transactions,
            "categories": []
        }))
        .unwrap();
        MemoryStore::with_snapshot(snapshot)
    }

    fn tx(id: &str, amount: f64, date: &str) -> serde_json::Value {
        json!({
            "id": id, "description": id, "amount": amount, "date": date,
            "type": "despesa", "categoryId": "exp-27"
        })
    }

    #[tokio::test]
    async fn test_host_sends_request_on_open() {
        let store = store_with(json!([tx("t1", 50.0, "2024-01-01")]));
        let config = config();
        let (host_end, peer) = MemoryConnection::pair();

        let mut protocol = SyncProtocol::new(Role::Host, &store, &config);
        assert_eq!(protocol.on_open(&host_end).await.unwrap(), Progress::Syncing);

        match peer.recv().await.unwrap().unwrap() {
            SyncMessage::SyncRequest { payload } => {
                assert_eq!(payload.validate().unwrap().transactions.len(), 1);
            }
            other => panic!("expected SyncRequest, got {}", other.kind()),
        }
        assert_eq!(protocol.report().messages_sent, 1);
    }

    #[tokio::test]
    async fn test_joiner_waits_on_open() {
        let store = MemoryStore::new();
        let config = config();
        let (joiner_end, peer) = MemoryConnection::pair();

        let mut protocol = SyncProtocol::new(Role::Joiner, &store, &config);
        protocol.on_open(&joiner_end).await.unwrap();
        joiner_end.close().await;

        assert!(peer.recv().await.is_none());
        assert_eq!(protocol.report().messages_sent, 0);
    }

    #[tokio::test]
    async fn test_joiner_replies_and_succeeds() {
        let store = store_with(json!([tx("t2", 30.0, "2024-01-02")]));
        let config = config();
        let (joiner_end, peer) = MemoryConnection::pair();

        let offer = store_with(json!([tx("t1", 50.0, "2024-01-01")]))
            .get_sync_data()
            .await
            .unwrap();

        let mut protocol = SyncProtocol::new(Role::Joiner, &store, &config);
        let progress = protocol
            .on_message(&joiner_end, SyncMessage::request(&offer).unwrap())
            .await
            .unwrap();
        assert_eq!(progress, Progress::Success);

        match peer.recv().await.unwrap().unwrap() {
            SyncMessage::SyncResponse { payload } => {
                let ids: Vec<_> = payload
                    .validate()
                    .unwrap()
                    .transactions
                    .into_iter()
                    .map(|t| t.id.to_string())
                    .collect();
                assert_eq!(ids, vec!["t2", "t1"]);
            }
            other => panic!("expected SyncResponse, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_host_stays_syncing_after_request() {
        let store = MemoryStore::new();
        let config = config();
        let (host_end, _peer) = MemoryConnection::pair();

        let mut protocol = SyncProtocol::new(Role::Host, &store, &config);
        let progress = protocol
            .on_message(&host_end, SyncMessage::request(&Snapshot::default()).unwrap())
            .await
            .unwrap();
        assert_eq!(progress, Progress::Syncing);
    }

    #[tokio::test]
    async fn test_invalid_payload_reports_error_to_peer() {
        let store = store_with(json!([tx("t1", 50.0, "2024-01-01")]));
        let before = store.get_sync_data().await.unwrap();
        let config = config();
        let (host_end, peer) = MemoryConnection::pair();

        let mut protocol = SyncProtocol::new(Role::Host, &store, &config);
        let malformed = SyncMessage::SyncResponse {
            payload: serde_json::from_value(json!({ "transactions": [] })).unwrap(),
        };
        let err = protocol.on_message(&host_end, malformed).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidSnapshot(_)));

        assert_eq!(
            peer.recv().await.unwrap().unwrap(),
            SyncMessage::error(MERGE_REJECTED_BY_PEER)
        );
        assert_eq!(store.get_sync_data().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_remote_error_surfaces_verbatim() {
        let store = MemoryStore::new();
        let config = config();
        let (conn, _peer) = MemoryConnection::pair();

        let mut protocol = SyncProtocol::new(Role::Joiner, &store, &config);
        let err = protocol
            .on_message(&conn, SyncMessage::error("disk full"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteReported(msg) if msg == "disk full"));

        let err = protocol
            .on_message(&conn, SyncMessage::error(""))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteReported(msg) if msg == UNKNOWN_REMOTE_ERROR));
    }

    #[tokio::test]
    async fn test_run_interrupted_by_close() {
        let store = MemoryStore::new();
        let config = config();
        let (joiner_end, peer) = MemoryConnection::pair();

        peer.close().await;
        let err = SyncProtocol::new(Role::Joiner, &store, &config)
            .run(&joiner_end)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Interrupted));
    }

    #[tokio::test]
    async fn test_run_times_out_on_silent_peer() {
        let store = MemoryStore::new();
        let config = SyncConfig {
            message_timeout: Duration::from_millis(20),
            ..config()
        };
        let (joiner_end, _peer) = MemoryConnection::pair();

        let err = SyncProtocol::new(Role::Joiner, &store, &config)
            .run(&joiner_end)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_run_skips_undecodable_frames() {
        let store = MemoryStore::new();
        let config = config();
        let (joiner_end, peer) = MemoryConnection::pair();

        peer.send_raw(bytes::Bytes::from_static(b"{\"type\":\"PING\"}"))
            .unwrap();
        peer.send(&SyncMessage::request(&Snapshot::default()).unwrap())
            .await
            .unwrap();

        let report = SyncProtocol::new(Role::Joiner, &store, &config)
            .run(&joiner_end)
            .await
            .unwrap();
        assert_eq!(report.messages_received, 1);
        assert_eq!(report.messages_sent, 1);
        assert!(report.fingerprint.is_some());
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl SyncStore for BrokenStore {
        async fn get_sync_data(&self) -> monetus_sync_store::Result<Snapshot> {
            Ok(Snapshot::default())
        }

        async fn merge_sync_data(&self, _remote: &SnapshotPayload) -> monetus_sync_store::Result<bool> {
            Err(monetus_sync_store::StoreError::Poisoned)
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_to_peer() {
        let store = BrokenStore;
        let config = config();
        let (joiner_end, peer) = MemoryConnection::pair();

        let mut protocol = SyncProtocol::new(Role::Joiner, &store, &config);
        let err = protocol
            .on_message(&joiner_end, SyncMessage::request(&Snapshot::default()).unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Store(_)));
        assert_eq!(
            peer.recv().await.unwrap().unwrap(),
            SyncMessage::error(MERGE_REJECTED_BY_PEER)
        );
        assert_eq!(protocol.report().messages_sent, 1);
    }

    #[tokio::test]
    async fn test_error_after_reply_fails_linger() {
        let store = MemoryStore::new();
        let config = SyncConfig {
            close_grace: Duration::from_secs(2),
            ..config()
        };
        let (joiner_end, peer) = MemoryConnection::pair();

        let mut protocol = SyncProtocol::new(Role::Joiner, &store, &config);
        let progress = protocol
            .on_message(&joiner_end, SyncMessage::request(&Snapshot::default()).unwrap())
            .await
            .unwrap();
        assert_eq!(progress, Progress::Success);

        peer.send(&SyncMessage::error("")).await.unwrap();
        let err = protocol.linger(&joiner_end).await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteReported(msg) if msg == UNKNOWN_REMOTE_ERROR));
    }

    #[tokio::test]
    async fn test_linger_ignores_late_data_and_ends_on_close() {
        let store = MemoryStore::new();
        let config = SyncConfig {
            close_grace: Duration::from_secs(5),
            ..config()
        };
        let (host_end, peer) = MemoryConnection::pair();

        peer.send(&SyncMessage::response(&Snapshot::default()).unwrap())
            .await
            .unwrap();
        peer.close().await;

        let protocol = SyncProtocol::new(Role::Host, &store, &config);
        let lingered =
            tokio::time::timeout(Duration::from_secs(1), protocol.linger(&host_end)).await;
        assert!(matches!(lingered, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_exchange_reports_before_linger() {
        let store = MemoryStore::new();
        let config = SyncConfig {
            close_grace: Duration::from_secs(5),
            ..config()
        };
        let (joiner_end, peer) = MemoryConnection::pair();
        peer.send(&SyncMessage::request(&Snapshot::default()).unwrap())
            .await
            .unwrap();

        let mut protocol = SyncProtocol::new(Role::Joiner, &store, &config);
        let report = tokio::time::timeout(Duration::from_secs(1), protocol.exchange(&joiner_end))
            .await
            .expect("exchange should not wait for the grace period")
            .unwrap();
        assert_eq!(report.messages_sent, 1);
        assert!(report.fingerprint.is_some());
    }
}
