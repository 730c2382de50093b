//! Snapshots: a full copy of one device's finance data.
//!
//! A [`Snapshot`] is always structurally valid. What arrives from a peer is a
//! [`SnapshotPayload`], which may be missing collections or carry records of
//! the wrong shape; [`SnapshotPayload::validate`] is the only way from one to
//! the other.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{CoreError, Result};
use crate::records::{CategoryRecord, GoalRecord, TransactionRecord};

/// A validated snapshot of transactions, categories, and goals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub transactions: Vec<TransactionRecord>,
    pub categories: Vec<CategoryRecord>,
    #[serde(default)]
    pub goals: Vec<GoalRecord>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record counts per collection.
    pub fn counts(&self) -> SnapshotCounts {
        SnapshotCounts {
            transactions: self.transactions.len(),
            categories: self.categories.len(),
            goals: self.goals.len(),
        }
    }

    /// Whether all three collections are empty.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.categories.is_empty() && self.goals.is_empty()
    }

    /// Convert to the wire form.
    pub fn to_payload(&self) -> Result<SnapshotPayload> {
        Ok(SnapshotPayload {
            transactions: Some(encode_list(&self.transactions)?),
            categories: Some(encode_list(&self.categories)?),
            goals: Some(encode_list(&self.goals)?),
        })
    }
}

/// Unvalidated snapshot as received from a peer.
///
/// Each collection is kept as raw JSON until [`validate`](Self::validate)
/// decodes it. A `null` collection is the same as an absent one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goals: Option<Value>,
}

impl SnapshotPayload {
    /// Number of entries in each collection that is a list; anything else counts as zero.
    pub fn counts(&self) -> SnapshotCounts {
        let len = |value: &Option<Value>| {
            value
                .as_ref()
                .and_then(Value::as_array)
                .map_or(0, Vec::len)
        };
        SnapshotCounts {
            transactions: len(&self.transactions),
            categories: len(&self.categories),
            goals: len(&self.goals),
        }
    }

    /// Decode into a [`Snapshot`].
    ///
    /// Fails with [`CoreError::InvalidSnapshot`] if `transactions` or
    /// `categories` is absent, or if any collection is not a list of
    /// well-formed records. Absent `goals` decode as empty.
    pub fn validate(&self) -> Result<Snapshot> {
        let transactions = decode_list(self.transactions.as_ref(), "transactions")?
            .ok_or_else(|| CoreError::InvalidSnapshot("missing transactions".into()))?;
        let categories = decode_list(self.categories.as_ref(), "categories")?
            .ok_or_else(|| CoreError::InvalidSnapshot("missing categories".into()))?;
        let goals = decode_list(self.goals.as_ref(), "goals")?.unwrap_or_default();

        Ok(Snapshot {
            transactions,
            categories,
            goals,
        })
    }
}

impl TryFrom<&Snapshot> for SnapshotPayload {
    type Error = CoreError;

    fn try_from(snapshot: &Snapshot) -> Result<Self> {
        snapshot.to_payload()
    }
}

/// Record counts for a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotCounts {
    pub transactions: usize,
    pub categories: usize,
    pub goals: usize,
}

impl fmt::Display for SnapshotCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} transactions, {} categories, {} goals",
            self.transactions, self.categories, self.goals
        )
    }
}

fn encode_list<T: Serialize>(records: &[T]) -> Result<Value> {
    serde_json::to_value(records).map_err(|e| CoreError::Encoding(e.to_string()))
}

fn decode_list<T: DeserializeOwned>(value: Option<&Value>, field: &str) -> Result<Option<Vec<T>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value @ Value::Array(_)) => Vec::<T>::deserialize(value)
            .map(Some)
            .map_err(|e| CoreError::InvalidSnapshot(format!("malformed {}: {}", field, e))),
        Some(_) => Err(CoreError::InvalidSnapshot(format!("{} is not a list", field))),
    }
}
