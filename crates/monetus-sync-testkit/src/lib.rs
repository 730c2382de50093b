//! # Monetus Sync Testkit
//!
//! Testing utilities for Monetus sync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: record builders and a pair of simulated devices
//! - **Generators**: proptest strategies for snapshots
//! - **Scripted transport**: registration outcomes on demand, for the
//!   rendezvous fallback policy
//! - **Faulty store**: merges that reject or fail on demand
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use monetus_sync_testkit::fixtures::{category, device_pair, run_sync, snapshot, transaction};
//!
//! # async fn example() {
//! let (_network, mut host, mut joiner) = device_pair(
//!     snapshot(vec![transaction("t1", 50.0, "2024-01-01")], vec![]),
//!     snapshot(vec![], vec![category("c1", "Mercado")]),
//! );
//! let (host_status, joiner_status) = run_sync(&mut host, &mut joiner).await;
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use monetus_sync_testkit::generators::snapshot;
//!
//! proptest! {
//!     #[test]
//!     fn merge_is_idempotent(local in snapshot(), remote in snapshot()) {
//!         // ...
//!     }
//! }
//! ```

pub mod faulty;
pub mod fixtures;
pub mod generators;
pub mod scripted;

pub use faulty::{Fault, FaultyStore};
pub use fixtures::{device_pair, init_tracing, run_sync, TestDevice};
pub use scripted::{Registration, ScriptedTransport};
