//! SQLite implementation of the SyncStore trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking. Each store instance is
//! scoped to one owner so several users can share a database file without
//! seeing each other's data.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;

use monetus_sync_core::{merge, Record, Snapshot, SnapshotPayload};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::SyncStore;

const TRANSACTIONS: &str = "transactions";
const CATEGORIES: &str = "categories";
const GOALS: &str = "goals";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    owner: Arc<str>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path for one owner.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>, owner: impl Into<String>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self::from_connection(conn, owner))
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory(owner: impl Into<String>) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self::from_connection(conn, owner))
    }

    fn from_connection(conn: Connection, owner: impl Into<String>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            owner: Arc::from(owner.into()),
        }
    }

    /// The owner this store is scoped to.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Replace the owner's data with `snapshot`.
    pub async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let snapshot = snapshot.clone();
        self.with_conn_mut(move |conn, owner| {
            let tx = conn.transaction()?;
            replace_all(&tx, owner, &snapshot)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Run a blocking operation on the connection off the async runtime.
    async fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let owner = Arc::clone(&self.owner);

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn, &owner)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl SyncStore for SqliteStore {
    async fn get_sync_data(&self) -> Result<Snapshot> {
        self.with_conn_mut(|conn, owner| read_all(conn, owner)).await
    }

    async fn merge_sync_data(&self, remote: &SnapshotPayload) -> Result<bool> {
        let remote = remote.clone();

        self.with_conn_mut(move |conn, owner| {
            let tx = conn.transaction()?;
            let local = read_all(&tx, owner)?;

            let merged = match merge(&local, &remote) {
                Ok(merged) => merged,
                Err(e) => {
                    tracing::warn!("rejected sync payload for {}: {}", owner, e);
                    return Ok(false);
                }
            };

            replace_all(&tx, owner, &merged)?;
            tx.commit()?;

            tracing::debug!("committed merged snapshot for {}: {}", owner, merged.counts());
            Ok(true)
        })
        .await
    }
}

fn read_all(conn: &Connection, owner: &str) -> Result<Snapshot> {
    Ok(Snapshot {
        transactions: read_collection(conn, owner, TRANSACTIONS)?,
        categories: read_collection(conn, owner, CATEGORIES)?,
        goals: read_collection(conn, owner, GOALS)?,
    })
}

fn read_collection<T: DeserializeOwned>(
    conn: &Connection,
    owner: &str,
    collection: &str,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare_cached(
        "SELECT body FROM records
         WHERE owner = ?1 AND collection = ?2
         ORDER BY position ASC",
    )?;

    let bodies = stmt
        .query_map(params![owner, collection], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    bodies
        .iter()
        .map(|body| {
            serde_json::from_str(body)
                .map_err(|e| StoreError::Serialization(format!("{}: {}", collection, e)))
        })
        .collect()
}

fn replace_all(conn: &Connection, owner: &str, snapshot: &Snapshot) -> Result<()> {
    conn.execute("DELETE FROM records WHERE owner = ?1", params![owner])?;

    write_collection(conn, owner, TRANSACTIONS, &snapshot.transactions)?;
    write_collection(conn, owner, CATEGORIES, &snapshot.categories)?;
    write_collection(conn, owner, GOALS, &snapshot.goals)?;
    Ok(())
}

fn write_collection<T: Record + Serialize>(
    conn: &Connection,
    owner: &str,
    collection: &str,
    records: &[T],
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO records (owner, collection, record_id, position, body)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;

    for (position, record) in records.iter().enumerate() {
        let body = serde_json::to_string(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        stmt.execute(params![
            owner,
            collection,
            record.id().as_str(),
            position as i64,
            body
        ])?;
    }
    Ok(())
}
