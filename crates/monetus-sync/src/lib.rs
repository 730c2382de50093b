//! # Monetus Sync
//!
//! Peer-to-peer handshake that brings two devices' finance data into the
//! same state over a direct channel.
//!
//! ## Overview
//!
//! One device hosts and shows a short rendezvous code; the other types the
//! code and joins. The Host offers its full snapshot, the Joiner merges it,
//! commits, and answers with its merged snapshot, which the Host merges in
//! turn. No server holds the data.
//!
//! ## Key Properties
//!
//! - **One round trip**: at most two protocol messages per session
//! - **Converging**: both sides end with the same record set
//! - **All or nothing**: a rejected payload leaves local data untouched
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use monetus_sync::{MemoryNetwork, SessionController, SyncConfig};
//! use monetus_sync_store::MemoryStore;
//!
//! async fn example() -> monetus_sync::Result<()> {
//!     let network = MemoryNetwork::new();
//!     let store = Arc::new(MemoryStore::new());
//!
//!     let mut host = SessionController::new(
//!         Arc::new(network.transport()),
//!         store,
//!         SyncConfig::default(),
//!     );
//!     host.open()?;
//!     host.start_as_host()?;
//!
//!     // Show host.status().rendezvous to the user, then:
//!     let status = host.wait_until_settled().await;
//!     println!("sync finished: {}", status.state);
//!     Ok(())
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Host                                Joiner
//!   |  register(code)                   |
//!   |<------------- dial(code) ---------|
//!   |-------- SYNC_REQUEST ------------>|  merge + commit
//!   |<------- SYNC_RESPONSE ------------|  Success
//!   |  merge + commit, Success          |
//! ```
//!
//! Either side answers a payload it cannot merge with `SYNC_ERROR`.

pub mod convergence;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod rendezvous;
pub mod session;
pub mod transport;

pub use convergence::{fingerprint, verify_convergence, ConvergenceResult, Fingerprint};
pub use error::{Result, SyncError};
pub use messages::{SyncMessage, MERGE_REJECTED_BY_PEER, UNKNOWN_REMOTE_ERROR};
pub use protocol::{Progress, Role, SyncConfig, SyncProtocol, SyncReport};
pub use rendezvous::{acquire, RendezvousId};
pub use session::{SessionController, SessionState, SessionStatus};
pub use transport::{
    memory::MemoryConnection, memory::MemoryListener, memory::MemoryNetwork,
    memory::MemoryTransport, Connection, Listener, Transport,
};
