//! # Monetus Sync Store
//!
//! The local data collaborator consumed by the sync protocol. Provides a
//! trait-based interface with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The sync core needs exactly two capabilities from local storage: read a
//! full [`Snapshot`](monetus_sync_core::Snapshot), and merge a remote
//! payload into local state reporting success or failure. Both live on the
//! [`SyncStore`] trait.
//!
//! ## Key Types
//!
//! - [`SyncStore`] - The async trait used by the sync protocol
//! - [`SqliteStore`] - SQLite-based persistent storage, scoped per owner
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use monetus_sync_store::{SqliteStore, SyncStore};
//!
//! async fn example() {
//!     // Open a SQLite database for one user
//!     let store = SqliteStore::open("monetus.db", "user-1").unwrap();
//!
//!     // Read everything this device holds
//!     let snapshot = store.get_sync_data().await.unwrap();
//!     println!("{}", snapshot.counts());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **All-or-nothing merges**: `merge_sync_data` either commits all three
//!   collections or leaves state untouched
//! - **Invalid input is not an error**: a structurally invalid payload
//!   returns `Ok(false)`; `Err` is reserved for storage failures

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::SyncStore;
