//! Convergence verification for sync sessions.
//!
//! After a successful session both devices should hold the same record set.
//! Collection order can differ between the two (categories and goals keep
//! local order), so the fingerprint hashes records sorted by id.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use monetus_sync_core::{Record, RecordId, Snapshot};

use crate::error::Result;

const DOMAIN: &[u8] = b"monetus-snapshot-v0:";

/// Order-independent digest of a snapshot's records.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// Full lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// Compute the fingerprint of a snapshot.
///
/// Algorithm, per collection in the fixed order transactions, categories,
/// goals: hash the collection name, then for each record sorted by id the
/// id and the record's JSON encoding.
pub fn fingerprint(snapshot: &Snapshot) -> Result<Fingerprint> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(DOMAIN);

    hash_collection(&mut hasher, "transactions", &snapshot.transactions)?;
    hash_collection(&mut hasher, "categories", &snapshot.categories)?;
    hash_collection(&mut hasher, "goals", &snapshot.goals)?;

    Ok(Fingerprint(*hasher.finalize().as_bytes()))
}

fn hash_collection<T: Record + Serialize>(
    hasher: &mut blake3::Hasher,
    name: &str,
    records: &[T],
) -> Result<()> {
    let index = encode_by_id(records)?;

    hasher.update(name.as_bytes());
    hasher.update(&(index.len() as u64).to_le_bytes());
    for (id, body) in index {
        hasher.update(&(id.len() as u64).to_le_bytes());
        hasher.update(id.as_bytes());
        hasher.update(&(body.len() as u64).to_le_bytes());
        hasher.update(&body);
    }
    Ok(())
}

fn encode_by_id<T: Record + Serialize>(records: &[T]) -> Result<BTreeMap<&str, Vec<u8>>> {
    let mut index = BTreeMap::new();
    for record in records {
        index.insert(record.id().as_str(), serde_json::to_vec(record)?);
    }
    Ok(index)
}

/// Compare two snapshots record by record.
pub fn verify_convergence(local: &Snapshot, remote: &Snapshot) -> Result<ConvergenceResult> {
    let mut divergence = Divergence::default();

    divergence.compare(&local.transactions, &remote.transactions)?;
    divergence.compare(&local.categories, &remote.categories)?;
    divergence.compare(&local.goals, &remote.goals)?;

    if divergence.is_empty() {
        Ok(ConvergenceResult::Converged)
    } else {
        Ok(ConvergenceResult::Diverged {
            missing_locally: divergence.missing_locally,
            missing_remotely: divergence.missing_remotely,
            differing: divergence.differing,
        })
    }
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both snapshots hold the same records.
    Converged,
    /// The snapshots differ.
    Diverged {
        /// Ids present only in the remote snapshot.
        missing_locally: Vec<RecordId>,
        /// Ids present only in the local snapshot.
        missing_remotely: Vec<RecordId>,
        /// Ids present in both with different contents.
        differing: Vec<RecordId>,
    },
}

impl ConvergenceResult {
    /// Check if the snapshots have converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

#[derive(Default)]
struct Divergence {
    missing_locally: Vec<RecordId>,
    missing_remotely: Vec<RecordId>,
    differing: Vec<RecordId>,
}

impl Divergence {
    fn compare<T: Record + Serialize>(&mut self, local: &[T], remote: &[T]) -> Result<()> {
        let local = encode_by_id(local)?;
        let remote = encode_by_id(remote)?;

        for (id, body) in &local {
            match remote.get(id) {
                None => self.missing_remotely.push(RecordId::from(*id)),
                Some(other) if other != body => self.differing.push(RecordId::from(*id)),
                Some(_) => {}
            }
        }
        for id in remote.keys() {
            if !local.contains_key(id) {
                self.missing_locally.push(RecordId::from(*id));
            }
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.missing_locally.is_empty() && self.missing_remotely.is_empty() && self.differing.is_empty()
    }
}
