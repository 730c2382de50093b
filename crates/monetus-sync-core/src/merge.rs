//! Snapshot merge engine.
//!
//! Merging is a union keyed by [`RecordId`]. When both sides carry the same
//! id the remote record replaces the local one. There are no timestamps or
//! versions involved: which side is "remote" decides the winner.
//!
//! Algorithm, per collection:
//! 1. Index local records by id, keeping local order
//! 2. Overlay every remote record: replace in place on a matching id, append otherwise
//! 3. Sort transactions by date, most recent first (ties by id)

use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::Result;
use crate::records::TransactionRecord;
use crate::snapshot::{Snapshot, SnapshotPayload};
use crate::types::{Record, RecordId};

/// Merge a remote payload into a local snapshot.
///
/// Fails with [`CoreError::InvalidSnapshot`](crate::CoreError::InvalidSnapshot)
/// if the remote payload does not validate. The local snapshot is never
/// modified.
pub fn merge(local: &Snapshot, remote: &SnapshotPayload) -> Result<Snapshot> {
    let remote = remote.validate()?;
    Ok(merge_snapshots(local, &remote))
}

/// Merge two validated snapshots, remote winning on id collision.
pub fn merge_snapshots(local: &Snapshot, remote: &Snapshot) -> Snapshot {
    let mut transactions = merge_records(&local.transactions, &remote.transactions);
    sort_transactions(&mut transactions);

    Snapshot {
        transactions,
        categories: merge_records(&local.categories, &remote.categories),
        goals: merge_records(&local.goals, &remote.goals),
    }
}

/// Union two record lists by id. Remote replaces local on a matching id.
///
/// The result keeps local order, with remote-only records appended in
/// remote order.
pub fn merge_records<T: Record>(local: &[T], remote: &[T]) -> Vec<T> {
    let mut merged: Vec<T> = Vec::with_capacity(local.len() + remote.len());
    let mut index: HashMap<RecordId, usize> = HashMap::with_capacity(local.len());

    for record in local.iter().chain(remote) {
        match index.get(record.id()) {
            Some(&pos) => merged[pos] = record.clone(),
            None => {
                index.insert(record.id().clone(), merged.len());
                merged.push(record.clone());
            }
        }
    }

    merged
}

/// Sort transactions most recent first.
///
/// Unparseable dates sort last. Equal dates order by id so the sequence is
/// fully determined by the set of records.
pub fn sort_transactions(transactions: &mut [TransactionRecord]) {
    transactions.sort_by(|a, b| {
        let key_a = Reverse(date_millis(&a.date).unwrap_or(i64::MIN));
        let key_b = Reverse(date_millis(&b.date).unwrap_or(i64::MIN));
        match key_a.cmp(&key_b) {
            Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        }
    });
}

/// Parse a record date into Unix milliseconds.
///
/// Accepts RFC 3339, a naive date-time, or a plain `YYYY-MM-DD` date. Naive
/// values are read as UTC.
pub fn date_millis(date: &str) -> Option<i64> {
    let date = date.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc().timestamp_millis());
    }
    if let Ok(d) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{CategoryRecord, EntryKind, GoalRecord};
    use crate::CoreError;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn tx(id: &str, amount: f64, date: &str) -> TransactionRecord {
        TransactionRecord {
            id: RecordId::new(id),
            description: format!("entry {}", id),
            merchant: None,
            amount,
            date: date.to_string(),
            kind: EntryKind::Expense,
            category_id: RecordId::new("exp-27"),
            receipt_url: None,
            is_gemini_parsed: None,
        }
    }

    fn category(id: &str, name: &str) -> CategoryRecord {
        CategoryRecord {
            id: RecordId::new(id),
            name: name.to_string(),
            icon: "Tag".to_string(),
            color: "bg-gray-100 text-gray-600".to_string(),
            kind: EntryKind::Expense,
        }
    }

    fn ids<T: Record>(records: &[T]) -> Vec<&str> {
        records.iter().map(|r| r.id().as_str()).collect()
    }

    #[test]
    fn test_remote_wins_on_collision() {
        let local = Snapshot {
            transactions: vec![tx("t1", 50.0, "2024-01-01")],
            ..Snapshot::default()
        };
        let remote = Snapshot {
            transactions: vec![tx("t1", 30.0, "2024-01-01")],
            ..Snapshot::default()
        };

        let merged = merge_snapshots(&local, &remote);
        assert_eq!(merged.transactions.len(), 1);
        assert_eq!(merged.transactions[0].amount, 30.0);
    }

    #[test]
    fn test_transactions_sorted_most_recent_first() {
        let local = Snapshot {
            transactions: vec![tx("t1", 50.0, "2024-01-10T08:00:00.000Z")],
            ..Snapshot::default()
        };
        let remote = Snapshot {
            transactions: vec![
                tx("t2", 30.0, "2024-02-01"),
                tx("t3", 10.0, "not a date"),
                tx("t0", 5.0, "2024-01-10T08:00:00Z"),
            ],
            ..Snapshot::default()
        };

        let merged = merge_snapshots(&local, &remote);
        assert_eq!(ids(&merged.transactions), vec!["t2", "t0", "t1", "t3"]);
    }

    #[test]
    fn test_categories_keep_local_order() {
        let local = vec![category("c2", "Mercado"), category("c1", "Aluguel")];
        let remote = vec![category("c3", "Streaming"), category("c1", "Moradia")];

        let merged = merge_records(&local, &remote);
        assert_eq!(ids(&merged), vec!["c2", "c1", "c3"]);
        assert_eq!(merged[1].name, "Moradia");
    }

    #[test]
    fn test_merge_rejects_missing_categories() {
        let remote = SnapshotPayload {
            transactions: Some(serde_json::json!([])),
            categories: None,
            goals: None,
        };
        let err = merge(&Snapshot::default(), &remote).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSnapshot(_)));
    }

    #[test]
    fn test_merge_treats_missing_goals_as_empty() {
        let local = Snapshot {
            goals: vec![GoalRecord {
                id: RecordId::new("g1"),
                target_amount: 500.0,
                category_id: RecordId::new("exp-1"),
                deadline: None,
            }],
            ..Snapshot::default()
        };
        let remote = SnapshotPayload {
            transactions: Some(serde_json::json!([])),
            categories: Some(serde_json::json!([])),
            goals: None,
        };
        let merged = merge(&local, &remote).unwrap();
        assert_eq!(ids(&merged.goals), vec!["g1"]);
    }

    #[test]
    fn test_date_millis_formats() {
        assert_eq!(date_millis("1970-01-02"), Some(86_400_000));
        assert_eq!(date_millis("1970-01-01T00:00:01.500Z"), Some(1_500));
        assert_eq!(date_millis("1970-01-01T00:00:02"), Some(2_000));
        assert_eq!(date_millis("yesterday"), None);
    }

    fn goal(id: &str, target_amount: f64, deadline: Option<String>) -> GoalRecord {
        GoalRecord {
            id: RecordId::new(id),
            target_amount,
            category_id: RecordId::new("inc-13"),
            deadline,
        }
    }

    fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
        (
            prop::collection::btree_map("t[0-9]{1,2}", (0u32..10_000, 1u32..28), 0..12),
            prop::collection::btree_map("c[0-9]", "[A-Z][a-z]{2,8}", 0..6),
            prop::collection::btree_map(
                "g[0-9]",
                (0u32..1_000_000, proptest::option::of(1u32..=12)),
                0..4,
            ),
        )
            .prop_map(|(txs, cats, goals)| Snapshot {
                transactions: txs
                    .into_iter()
                    .map(|(id, (cents, day))| {
                        tx(&id, cents as f64 / 100.0, &format!("2024-03-{:02}", day))
                    })
                    .collect(),
                categories: cats
                    .into_iter()
                    .map(|(id, name)| category(&id, &name))
                    .collect(),
                goals: goals
                    .into_iter()
                    .map(|(id, (cents, month))| {
                        let deadline = month.map(|m| format!("2024-{:02}-28", m));
                        goal(&id, cents as f64 / 100.0, deadline)
                    })
                    .collect(),
            })
    }

    fn by_id<T: Record>(records: &[T]) -> BTreeMap<String, T> {
        records
            .iter()
            .map(|r| (r.id().as_str().to_string(), r.clone()))
            .collect()
    }

    /// Every local-only record survives unchanged and every remote record is present as sent.
    fn assert_no_drops<T: Record + PartialEq + std::fmt::Debug>(
        merged: &[T],
        local: &[T],
        remote: &[T],
    ) -> std::result::Result<(), TestCaseError> {
        let merged = by_id(merged);
        let local = by_id(local);
        let remote = by_id(remote);

        for (id, record) in &local {
            if !remote.contains_key(id) {
                prop_assert_eq!(merged.get(id), Some(record));
            }
        }
        for (id, record) in &remote {
            prop_assert_eq!(merged.get(id), Some(record));
        }
        let union = local.keys().chain(remote.keys()).collect::<std::collections::BTreeSet<_>>();
        prop_assert_eq!(merged.len(), union.len());
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_merge_is_idempotent(s in snapshot_strategy()) {
            let merged = merge_snapshots(&s, &s);
            prop_assert_eq!(by_id(&merged.transactions), by_id(&s.transactions));
            prop_assert_eq!(&merged.categories, &s.categories);
            prop_assert_eq!(&merged.goals, &s.goals);

            let again = merge_snapshots(&merged, &s);
            prop_assert_eq!(again, merged);
        }

        #[test]
        fn prop_merge_commutes_on_keys(a in snapshot_strategy(), b in snapshot_strategy()) {
            let ab = merge_snapshots(&a, &b);
            let ba = merge_snapshots(&b, &a);
            prop_assert_eq!(
                by_id(&ab.transactions).into_keys().collect::<Vec<_>>(),
                by_id(&ba.transactions).into_keys().collect::<Vec<_>>()
            );
            prop_assert_eq!(
                by_id(&ab.categories).into_keys().collect::<Vec<_>>(),
                by_id(&ba.categories).into_keys().collect::<Vec<_>>()
            );
            prop_assert_eq!(
                by_id(&ab.goals).into_keys().collect::<Vec<_>>(),
                by_id(&ba.goals).into_keys().collect::<Vec<_>>()
            );
        }

        #[test]
        fn prop_remote_value_wins(a in snapshot_strategy(), b in snapshot_strategy()) {
            let merged = merge_snapshots(&a, &b);
            let transactions = by_id(&merged.transactions);
            for (id, record) in by_id(&b.transactions) {
                prop_assert_eq!(transactions.get(&id), Some(&record));
            }
            let goals = by_id(&merged.goals);
            for (id, record) in by_id(&b.goals) {
                prop_assert_eq!(goals.get(&id), Some(&record));
            }
        }

        #[test]
        fn prop_merge_never_drops_records(a in snapshot_strategy(), b in snapshot_strategy()) {
            let merged = merge_snapshots(&a, &b);
            assert_no_drops(&merged.transactions, &a.transactions, &b.transactions)?;
            assert_no_drops(&merged.categories, &a.categories, &b.categories)?;
            assert_no_drops(&merged.goals, &a.goals, &b.goals)?;
        }

        #[test]
        fn prop_output_order_is_deterministic(a in snapshot_strategy(), b in snapshot_strategy()) {
            let first = merge_snapshots(&a, &b);
            let second = merge_snapshots(&a, &b);
            prop_assert_eq!(first, second);
        }
    }
}
