//! Device-local persistence for the sync core.
//!
//! The store holds three collections (cached notes, the pending-change
//! queue and the current-user record) in SQLite. Every collection is a
//! table keyed by record id whose body is the record's JSON, so `put` is
//! insert-or-replace and at most one record exists per id.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{NoteError, NoteResult};
use crate::models::{Note, PendingChange, UserRecord};

/// Schema version written at initialization
pub const SCHEMA_VERSION: i64 = 1;

/// Process-wide handle shared by the engine and its tasks
pub type SharedStore = Arc<Mutex<LocalStore>>;

/// The record collections held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Notes,
    PendingChanges,
    UserData,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Notes,
        Collection::PendingChanges,
        Collection::UserData,
    ];

    /// Collection name as exposed to callers
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Notes => "notes",
            Collection::PendingChanges => "pendingChanges",
            Collection::UserData => "userData",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Collection::Notes => "notes",
            Collection::PendingChanges => "pending_changes",
            Collection::UserData => "user_data",
        }
    }
}

/// A record that lives in one of the store's collections.
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn record_id(&self) -> &str;
}

impl Record for Note {
    const COLLECTION: Collection = Collection::Notes;

    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for PendingChange {
    const COLLECTION: Collection = Collection::PendingChanges;

    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for UserRecord {
    const COLLECTION: Collection = Collection::UserData;

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// SQLite-backed local store
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    /// Open (or create) a store file.
    ///
    /// Any failure here is `StorageUnavailable`: without the store the
    /// offline path cannot work at all.
    pub fn open<P: AsRef<Path>>(db_path: P) -> NoteResult<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            NoteError::storage_unavailable(format!("cannot open {}: {}", path.display(), e))
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| NoteError::storage_unavailable(format!("cannot enable WAL: {}", e)))?;

        let store = Self::init(conn)?;
        tracing::info!("Opened local store at {}", path.display());
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn open_in_memory() -> NoteResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| NoteError::storage_unavailable(e.to_string()))?;
        Self::init(conn)
    }

    /// Wrap the store in the shared handle used by the engine
    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    fn init(conn: Connection) -> NoteResult<Self> {
        let store = Self { conn };
        store
            .init_schema()
            .map_err(|e| NoteError::storage_unavailable(format!("cannot initialize schema: {}", e)))?;

        let version = store.schema_version().map_err(|e| match e {
            err @ NoteError::StorageUnavailable(_) => err,
            other => NoteError::storage_unavailable(format!("cannot read schema version: {}", other)),
        })?;
        if version > SCHEMA_VERSION {
            return Err(NoteError::storage_unavailable(format!(
                "store schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pending_changes (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_data (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );
            "#,
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    /// Schema version marker stored in the file
    pub fn schema_version(&self) -> NoteResult<i64> {
        let value: String = self.conn.query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )?;
        value
            .parse()
            .map_err(|_| NoteError::storage_unavailable(format!("bad schema_version marker: {}", value)))
    }

    /// Point lookup
    pub fn get<R: Record>(&self, id: &str) -> NoteResult<Option<R>> {
        Self::get_on(&self.conn, id)
    }

    fn get_on<R: Record>(conn: &Connection, id: &str) -> NoteResult<Option<R>> {
        let sql = format!("SELECT body FROM {} WHERE id = ?", R::COLLECTION.table());
        let body: Option<String> = conn
            .query_row(&sql, params![id], |row| row.get(0))
            .optional()?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Full scan in key order
    pub fn get_all<R: Record>(&self) -> NoteResult<Vec<R>> {
        let sql = format!("SELECT body FROM {} ORDER BY id", R::COLLECTION.table());
        let mut stmt = self.conn.prepare(&sql)?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(NoteError::from))
            .collect()
    }

    /// Insert or replace a record keyed by its id
    pub fn put<R: Record>(&self, record: &R) -> NoteResult<()> {
        Self::put_on(&self.conn, record)
    }

    /// Insert or replace several records in one transaction
    pub fn put_all<R: Record>(&self, records: &[R]) -> NoteResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for record in records {
            Self::put_on(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn put_on<R: Record>(conn: &Connection, record: &R) -> NoteResult<()> {
        let body = serde_json::to_string(record)?;
        let sql = format!(
            "INSERT OR REPLACE INTO {} (id, body) VALUES (?, ?)",
            R::COLLECTION.table()
        );
        conn.execute(&sql, params![record.record_id(), body])?;
        Ok(())
    }

    /// Remove a record. Returns whether anything was deleted.
    pub fn delete(&self, collection: Collection, id: &str) -> NoteResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?", collection.table());
        let deleted = self.conn.execute(&sql, params![id])?;
        Ok(deleted > 0)
    }

    /// Number of records in a collection
    pub fn count(&self, collection: Collection) -> NoteResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.table());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Persist a note together with its pending change.
    ///
    /// Both writes share one transaction so a crash can never leave the
    /// cached note without its queue entry or the reverse. The queued
    /// entry replaces any earlier one for the same note and gets a
    /// timestamp strictly greater than every timestamp in the queue.
    pub fn put_note_with_pending(&self, note: &Note, now_ms: i64) -> NoteResult<PendingChange> {
        let tx = self.conn.unchecked_transaction()?;

        let timestamp = Self::next_pending_timestamp_on(&tx, now_ms)?;
        let change = PendingChange::update(note.clone(), timestamp);

        Self::put_on(&tx, note)?;
        Self::put_on(&tx, &change)?;
        tx.commit()?;

        Ok(change)
    }

    /// Remove a queued change once it has been applied remotely.
    ///
    /// The entry is only removed if it is still the one identified by
    /// `timestamp`; a newer edit queued meanwhile stays in the queue.
    pub fn remove_pending(&self, note_id: &str, timestamp: i64) -> NoteResult<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let current: Option<PendingChange> = Self::get_on(&tx, note_id)?;
        let removed = match current {
            Some(change) if change.timestamp == timestamp => {
                tx.execute("DELETE FROM pending_changes WHERE id = ?", params![note_id])?;
                true
            }
            _ => false,
        };
        tx.commit()?;
        Ok(removed)
    }

    /// Record a failed drain attempt on a queued change.
    ///
    /// Same staleness rule as [`LocalStore::remove_pending`]. Returns the
    /// updated entry if it was still current.
    pub fn record_pending_failure(
        &self,
        note_id: &str,
        timestamp: i64,
        error: &str,
    ) -> NoteResult<Option<PendingChange>> {
        let tx = self.conn.unchecked_transaction()?;
        let current: Option<PendingChange> = Self::get_on(&tx, note_id)?;
        let updated = match current {
            Some(mut change) if change.timestamp == timestamp => {
                change.attempts += 1;
                change.last_error = Some(error.to_string());
                Self::put_on(&tx, &change)?;
                Some(change)
            }
            _ => None,
        };
        tx.commit()?;
        Ok(updated)
    }

    /// Timestamp for the next queue entry given the current clock
    pub fn next_pending_timestamp(&self, now_ms: i64) -> NoteResult<i64> {
        Self::next_pending_timestamp_on(&self.conn, now_ms)
    }

    fn next_pending_timestamp_on(conn: &Connection, now_ms: i64) -> NoteResult<i64> {
        let mut stmt = conn.prepare("SELECT body FROM pending_changes")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut latest: Option<i64> = None;
        for body in bodies {
            let change: PendingChange = serde_json::from_str(&body)?;
            latest = Some(latest.map_or(change.timestamp, |l| l.max(change.timestamp)));
        }

        Ok(match latest {
            Some(latest) if latest >= now_ms => latest + 1,
            _ => now_ms,
        })
    }

    /// Close the store, reporting any error from SQLite
    pub fn close(self) -> NoteResult<()> {
        self.conn.close().map_err(|(_, e)| NoteError::Database(e))
    }
}
