//! Proptest generators for property-based testing.
//!
//! Ids come from a small alphabet so two independently generated snapshots
//! collide often. Within one collection ids are unique.

use std::collections::HashSet;

use proptest::prelude::*;

use monetus_sync_core::{
    CategoryRecord, EntryKind, GoalRecord, Record, RecordId, Snapshot, TransactionRecord,
};

/// Generate a record id such as `b7`.
pub fn record_id() -> impl Strategy<Value = RecordId> {
    "[a-d][0-9]".prop_map(RecordId::from)
}

/// Generate an amount with cent precision.
pub fn amount() -> impl Strategy<Value = f64> {
    (0i64..10_000_000).prop_map(|cents| cents as f64 / 100.0)
}

/// Generate a record date: a plain date, a full timestamp, or garbage.
pub fn date() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => (1u32..=12, 1u32..=28).prop_map(|(m, d)| format!("2024-{:02}-{:02}", m, d)),
        4 => (1u32..=12, 1u32..=28, 0u32..24)
            .prop_map(|(m, d, h)| format!("2024-{:02}-{:02}T{:02}:30:00.000Z", m, d, h)),
        1 => Just("ontem".to_string()),
    ]
}

/// Generate an income or expense marker.
pub fn entry_kind() -> impl Strategy<Value = EntryKind> {
    prop_oneof![Just(EntryKind::Income), Just(EntryKind::Expense)]
}

/// Generate a transaction.
pub fn transaction() -> impl Strategy<Value = TransactionRecord> {
    (
        record_id(),
        "[A-Za-z ]{1,16}",
        proptest::option::of("[A-Za-z]{1,12}"),
        amount(),
        date(),
        entry_kind(),
        record_id(),
    )
        .prop_map(
            |(id, description, merchant, amount, date, kind, category_id)| TransactionRecord {
                id,
                description,
                merchant,
                amount,
                date,
                kind,
                category_id,
                receipt_url: None,
                is_gemini_parsed: None,
            },
        )
}

/// Generate a category.
pub fn category() -> impl Strategy<Value = CategoryRecord> {
    (record_id(), "[A-Za-z ]{1,16}", entry_kind()).prop_map(|(id, name, kind)| CategoryRecord {
        id,
        name,
        icon: "Tag".to_string(),
        color: "bg-gray-100 text-gray-700".to_string(),
        kind,
    })
}

/// Generate a goal.
pub fn goal() -> impl Strategy<Value = GoalRecord> {
    (
        record_id(),
        amount(),
        record_id(),
        proptest::option::of(date()),
    )
        .prop_map(|(id, target_amount, category_id, deadline)| GoalRecord {
            id,
            target_amount,
            category_id,
            deadline,
        })
}

/// Generate a list of up to `max` records with distinct ids.
pub fn unique_records<T, S>(record: S, max: usize) -> impl Strategy<Value = Vec<T>>
where
    T: Record + std::fmt::Debug,
    S: Strategy<Value = T>,
{
    prop::collection::vec(record, 0..=max).prop_map(|records| {
        let mut seen = HashSet::new();
        records
            .into_iter()
            .filter(|r| seen.insert(r.id().clone()))
            .collect()
    })
}

/// Generate a full snapshot.
pub fn snapshot() -> impl Strategy<Value = Snapshot> {
    (
        unique_records(transaction(), 8),
        unique_records(category(), 6),
        unique_records(goal(), 4),
    )
        .prop_map(|(transactions, categories, goals)| Snapshot {
            transactions,
            categories,
            goals,
        })
}
