//! Transport abstraction for the sync protocol.
//!
//! The protocol only needs a direct, reliable, ordered channel between two
//! endpoints plus a rendezvous registry to find each other. Implementations
//! may be a browser-style data channel, a relay server, or the in-memory
//! backend below.

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::SyncMessage;
use crate::rendezvous::RendezvousId;

/// An open channel to exactly one peer.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send a message to the peer.
    ///
    /// Fails with [`SyncError::Send`](crate::SyncError::Send) if the channel is
    /// closed or the peer has disconnected.
    async fn send(&self, message: &SyncMessage) -> Result<()>;

    /// Receive the next message.
    ///
    /// Returns `None` once the connection is closed, from either side.
    /// A frame that cannot be decoded yields `Some(Err(_))` and the stream
    /// continues.
    async fn recv(&self) -> Option<Result<SyncMessage>>;

    /// Close the connection. Idempotent.
    async fn close(&self);

    /// Whether this side still considers the connection open.
    fn is_open(&self) -> bool;
}

/// A registered endpoint waiting for one inbound connection.
#[async_trait]
pub trait Listener: Send + Sync {
    type Connection: Connection + 'static;

    /// The identifier peers dial to reach this listener.
    fn rendezvous_id(&self) -> &RendezvousId;

    /// Wait for the inbound connection.
    ///
    /// The identifier is released once a connection is accepted.
    async fn accept(&mut self) -> Result<Self::Connection>;

    /// Stop listening and release the identifier. Idempotent.
    async fn close(&mut self);
}

/// Rendezvous registry plus connection establishment.
#[async_trait]
pub trait Transport: Send + Sync {
    type Connection: Connection + 'static;
    type Listener: Listener<Connection = Self::Connection> + 'static;

    /// Register a listening endpoint.
    ///
    /// With `Some(id)` the backend must use exactly that identifier or fail
    /// with [`SyncError::IdentifierUnavailable`](crate::SyncError::IdentifierUnavailable).
    /// With `None` the backend assigns a unique identifier.
    async fn register(&self, preferred: Option<&RendezvousId>) -> Result<Self::Listener>;

    /// Connect to the endpoint registered under `target`.
    async fn dial(&self, target: &RendezvousId) -> Result<Self::Connection>;
}

/// A simple in-memory transport for testing.
///
/// Uses channels to simulate a rendezvous registry and paired data
/// channels. Frames are JSON-encoded on send and decoded on receive so the
/// wire format is exercised exactly as on a real backend.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use tokio::sync::{mpsc, watch};

    use crate::error::SyncError;

    enum Slot {
        Listening {
            token: u64,
            incoming: mpsc::Sender<MemoryConnection>,
        },
        Reserved,
    }

    /// Shared rendezvous registry for in-memory transports.
    pub struct MemoryNetwork {
        registry: Mutex<HashMap<RendezvousId, Slot>>,
        next_token: AtomicU64,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport attached to this network.
        pub fn transport(self: &Arc<Self>) -> MemoryTransport {
            MemoryTransport {
                network: Arc::clone(self),
            }
        }

        /// Occupy `id` without listening on it.
        ///
        /// Returns false if the identifier was already taken.
        pub fn reserve(&self, id: RendezvousId) -> bool {
            match self.registry.lock() {
                Ok(mut registry) => {
                    if registry.contains_key(&id) {
                        return false;
                    }
                    registry.insert(id, Slot::Reserved);
                    true
                }
                Err(_) => false,
            }
        }

        /// Whether `id` is currently registered or reserved.
        pub fn is_registered(&self, id: &RendezvousId) -> bool {
            self.registry
                .lock()
                .map(|registry| registry.contains_key(id))
                .unwrap_or(false)
        }

        /// Number of live listeners, excluding reservations.
        pub fn listener_count(&self) -> usize {
            self.registry
                .lock()
                .map(|registry| {
                    registry
                        .values()
                        .filter(|slot| matches!(slot, Slot::Listening { .. }))
                        .count()
                })
                .unwrap_or(0)
        }

        fn release(&self, id: &RendezvousId, token: u64) {
            if let Ok(mut registry) = self.registry.lock() {
                if matches!(registry.get(id), Some(Slot::Listening { token: t, .. }) if *t == token)
                {
                    registry.remove(id);
                    tracing::debug!("released rendezvous {}", id);
                }
            }
        }
    }

    impl Default for MemoryNetwork {
        fn default() -> Self {
            Self {
                registry: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
            }
        }
    }

    /// In-memory transport implementation.
    #[derive(Clone)]
    pub struct MemoryTransport {
        network: Arc<MemoryNetwork>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        type Connection = MemoryConnection;
        type Listener = MemoryListener;

        async fn register(&self, preferred: Option<&RendezvousId>) -> Result<MemoryListener> {
            let mut registry = self
                .network
                .registry
                .lock()
                .map_err(|_| SyncError::Connection("rendezvous registry unavailable".into()))?;

            let id = match preferred {
                Some(id) if registry.contains_key(id) => {
                    return Err(SyncError::IdentifierUnavailable(id.clone()));
                }
                Some(id) => id.clone(),
                None => {
                    let mut rng = rand::thread_rng();
                    loop {
                        let candidate = RendezvousId::generate_token(&mut rng);
                        if !registry.contains_key(&candidate) {
                            break candidate;
                        }
                    }
                }
            };

            let token = self.network.next_token.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = mpsc::channel(1);
            registry.insert(
                id.clone(),
                Slot::Listening {
                    token,
                    incoming: tx,
                },
            );
            tracing::debug!("registered rendezvous {}", id);

            Ok(MemoryListener {
                id,
                token,
                network: Arc::clone(&self.network),
                incoming: rx,
            })
        }

        async fn dial(&self, target: &RendezvousId) -> Result<MemoryConnection> {
            let registry = self
                .network
                .registry
                .lock()
                .map_err(|_| SyncError::Connection("rendezvous registry unavailable".into()))?;

            let incoming = match registry.get(target) {
                Some(Slot::Listening { incoming, .. }) => incoming,
                _ => {
                    return Err(SyncError::Connection(format!(
                        "no endpoint listening on {}",
                        target
                    )))
                }
            };

            let (host_end, joiner_end) = MemoryConnection::pair();
            incoming
                .try_send(host_end)
                .map_err(|_| SyncError::Connection(format!("endpoint {} is busy", target)))?;

            tracing::debug!("dialed rendezvous {}", target);
            Ok(joiner_end)
        }
    }

    /// In-memory listener.
    pub struct MemoryListener {
        id: RendezvousId,
        token: u64,
        network: Arc<MemoryNetwork>,
        incoming: mpsc::Receiver<MemoryConnection>,
    }

    impl std::fmt::Debug for MemoryListener {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MemoryListener")
                .field("id", &self.id)
                .field("token", &self.token)
                .finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl Listener for MemoryListener {
        type Connection = MemoryConnection;

        fn rendezvous_id(&self) -> &RendezvousId {
            &self.id
        }

        async fn accept(&mut self) -> Result<MemoryConnection> {
            let conn = self
                .incoming
                .recv()
                .await
                .ok_or_else(|| SyncError::Connection("listener closed".into()))?;
            self.network.release(&self.id, self.token);
            self.incoming.close();
            Ok(conn)
        }

        async fn close(&mut self) {
            self.network.release(&self.id, self.token);
            self.incoming.close();
        }
    }

    impl Drop for MemoryListener {
        fn drop(&mut self) {
            self.network.release(&self.id, self.token);
        }
    }

    /// One end of an in-memory data channel.
    #[derive(Debug)]
    pub struct MemoryConnection {
        outgoing: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
        incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
        open: AtomicBool,
        closed: watch::Sender<bool>,
    }

    impl MemoryConnection {
        /// Create two connected ends.
        pub fn pair() -> (Self, Self) {
            let (a_tx, a_rx) = mpsc::unbounded_channel();
            let (b_tx, b_rx) = mpsc::unbounded_channel();
            (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
        }

        fn new(outgoing: mpsc::UnboundedSender<Bytes>, incoming: mpsc::UnboundedReceiver<Bytes>) -> Self {
            let (closed, _) = watch::channel(false);
            Self {
                outgoing: Mutex::new(Some(outgoing)),
                incoming: tokio::sync::Mutex::new(incoming),
                open: AtomicBool::new(true),
                closed,
            }
        }

        /// Send a raw frame, bypassing message encoding.
        pub fn send_raw(&self, frame: Bytes) -> Result<()> {
            if !self.is_open() {
                return Err(SyncError::Send("connection closed".into()));
            }
            let outgoing = self
                .outgoing
                .lock()
                .map_err(|_| SyncError::Send("connection state poisoned".into()))?;
            match outgoing.as_ref() {
                Some(tx) => tx
                    .send(frame)
                    .map_err(|_| SyncError::Send("peer disconnected".into())),
                None => Err(SyncError::Send("connection closed".into())),
            }
        }
    }

    #[async_trait]
    impl Connection for MemoryConnection {
        async fn send(&self, message: &SyncMessage) -> Result<()> {
            let frame = message.encode()?;
            self.send_raw(frame)?;
            tracing::debug!("sent {}", message.kind());
            Ok(())
        }

        async fn recv(&self) -> Option<Result<SyncMessage>> {
            let mut closed = self.closed.subscribe();
            if *closed.borrow() {
                return None;
            }

            let mut incoming = self.incoming.lock().await;
            let frame = tokio::select! {
                frame = incoming.recv() => frame,
                _ = closed.wait_for(|closed| *closed) => {
                    incoming.close();
                    None
                }
            };

            frame.map(|frame| SyncMessage::decode(&frame))
        }

        async fn close(&self) {
            if !self.open.swap(false, Ordering::SeqCst) {
                return;
            }
            self.closed.send_replace(true);
            if let Ok(mut outgoing) = self.outgoing.lock() {
                outgoing.take();
            }
            if let Ok(mut incoming) = self.incoming.try_lock() {
                incoming.close();
            }
            tracing::debug!("closed memory connection");
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    impl Drop for MemoryConnection {
        fn drop(&mut self) {
            self.open.store(false, Ordering::SeqCst);
            self.closed.send_replace(true);
        }
    }
}
