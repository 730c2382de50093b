//! Finance records exchanged during sync.
//!
//! Field names follow the JSON shape both devices persist and send, so a
//! record decoded from the wire serializes back byte-compatible.

use serde::{Deserialize, Serialize};

use crate::types::{Record, RecordId};

/// Whether an entry or category counts as income or expense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    #[serde(rename = "receita")]
    Income,
    #[serde(rename = "despesa")]
    Expense,
}

/// A single income or expense entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: RecordId,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    pub amount: f64,
    /// ISO 8601 date or date-time.
    pub date: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub category_id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_gemini_parsed: Option<bool>,
}

impl Record for TransactionRecord {
    fn id(&self) -> &RecordId {
        &self.id
    }
}

/// A user-visible category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: RecordId,
    pub name: String,
    pub icon: String,
    pub color: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

impl Record for CategoryRecord {
    fn id(&self) -> &RecordId {
        &self.id
    }
}

/// A savings or spending goal attached to a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalRecord {
    pub id: RecordId,
    pub target_amount: f64,
    pub category_id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
}

impl Record for GoalRecord {
    fn id(&self) -> &RecordId {
        &self.id
    }
}
