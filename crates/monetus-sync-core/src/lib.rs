//! # Monetus Sync Core
//!
//! Pure primitives for Monetus device sync: finance records, snapshots,
//! and the merge engine that reconciles two snapshots.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Snapshot`] - A validated full copy of one device's data
//! - [`SnapshotPayload`] - The unvalidated wire form of a snapshot
//! - [`RecordId`] - Caller-assigned identity shared by every record kind
//! - [`Record`] - Trait implemented by identity-keyed records
//!
//! ## Merging
//!
//! Merging is a union keyed by record id where the remote side wins on
//! collision. See [`merge`] module.

pub mod error;
pub mod merge;
pub mod records;
pub mod snapshot;
pub mod types;

pub use error::{CoreError, Result};
pub use merge::{date_millis, merge, merge_records, merge_snapshots, sort_transactions};
pub use records::{CategoryRecord, EntryKind, GoalRecord, TransactionRecord};
pub use snapshot::{Snapshot, SnapshotCounts, SnapshotPayload};
pub use types::{Record, RecordId};
