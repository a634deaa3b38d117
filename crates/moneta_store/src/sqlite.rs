//! SQLite-backed record store.

use moneta_core::{
    now_timestamp, RecordEnvelope, SettingsStore, StoreError, StoreResult, SyncStatus,
    SyncableTable,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

struct StoreInner {
    conn: Mutex<Connection>,
    ready: AtomicBool,
}

impl StoreInner {
    fn guard_ready(&self) -> StoreResult<()> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotReady)
        }
    }
}

fn db_err(err: rusqlite::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn validate_table_name(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid_rest = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(name.to_string()))
    }
}

fn parse_envelope(id: &str, payload: &str) -> StoreResult<RecordEnvelope> {
    serde_json::from_str(payload).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

/// The production local store: one uniform SQLite table per syncable entity
/// plus a key-value `settings` table.
///
/// Cloning is cheap; all clones share one serialized connection. Every
/// operation before [`SqliteStore::initialize`] completes fails with
/// [`StoreError::NotReady`], which background callers treat as "nothing to
/// sync yet".
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        Ok(Self::from_connection(conn))
    }

    /// Opens an in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                ready: AtomicBool::new(false),
            }),
        }
    }

    /// Creates the schema for the given entity tables and marks the store
    /// ready. Idempotent; safe to call on every startup.
    pub fn initialize(&self, tables: &[&str]) -> StoreResult<()> {
        for name in tables {
            validate_table_name(name)?;
        }

        let mut sql = String::from(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        );
        for name in tables {
            sql.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {name} (
                    id TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    sync_status TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{name}_sync_status
                    ON {name} (sync_status);"
            ));
        }

        let conn = self.inner.conn.lock();
        conn.execute_batch(&sql).map_err(db_err)?;
        drop(conn);

        self.inner.ready.store(true, Ordering::SeqCst);
        debug!(tables = tables.len(), "store initialized");
        Ok(())
    }

    /// Returns a handle to one entity table.
    ///
    /// Handles can be created before [`SqliteStore::initialize`] runs; the
    /// operations themselves enforce readiness.
    pub fn table(&self, name: &str) -> StoreResult<SqliteTable> {
        validate_table_name(name)?;
        Ok(SqliteTable {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
        })
    }
}

impl SettingsStore for SqliteStore {
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.guard_ready()?;
        let conn = self.inner.conn.lock();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.guard_ready()?;
        let conn = self.inner.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

/// A handle to one syncable entity table in a [`SqliteStore`].
///
/// Exposes the local-write API that maintains the dirty-tracking invariants
/// (writes mark rows dirty, deletes leave tombstones) alongside the
/// [`SyncableTable`] contract consumed by the sync engine.
#[derive(Clone)]
pub struct SqliteTable {
    inner: Arc<StoreInner>,
    name: String,
}

impl SqliteTable {
    /// Saves a locally-edited record: refreshes `updated_at`, marks the row
    /// dirty, and preserves the original `created_at` on updates.
    pub fn save(&self, record: &RecordEnvelope) -> StoreResult<RecordEnvelope> {
        self.inner.guard_ready()?;

        let mut stored = record.clone();
        stored.updated_at = now_timestamp();

        let conn = self.inner.conn.lock();
        let existing_created_at: Option<String> = conn
            .query_row(
                &format!("SELECT created_at FROM {} WHERE id = ?1", self.name),
                params![stored.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if let Some(created_at) = existing_created_at {
            stored.created_at = created_at;
        }

        let payload = serde_json::to_string(&stored)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, payload, sync_status, updated_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    payload = excluded.payload,
                    sync_status = excluded.sync_status,
                    updated_at = excluded.updated_at",
                self.name
            ),
            params![
                stored.id,
                payload,
                SyncStatus::Dirty.as_str(),
                stored.updated_at,
                stored.created_at
            ],
        )
        .map_err(db_err)?;
        Ok(stored)
    }

    /// Deletes a record locally: the row is kept as a tombstone with status
    /// `deleted` until a push acknowledges it. Returns false for unknown ids.
    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        self.inner.guard_ready()?;
        let conn = self.inner.conn.lock();

        let payload: Option<String> = conn
            .query_row(
                &format!("SELECT payload FROM {} WHERE id = ?1", self.name),
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let Some(payload) = payload else {
            return Ok(false);
        };

        let mut env = parse_envelope(id, &payload)?;
        env.deleted = true;
        env.updated_at = now_timestamp();
        let payload = serde_json::to_string(&env)?;

        conn.execute(
            &format!(
                "UPDATE {} SET payload = ?2, sync_status = ?3, updated_at = ?4 WHERE id = ?1",
                self.name
            ),
            params![id, payload, SyncStatus::Deleted.as_str(), env.updated_at],
        )
        .map_err(db_err)?;
        Ok(true)
    }

    /// Reads one record by id, tombstones included.
    pub fn get(&self, id: &str) -> StoreResult<Option<RecordEnvelope>> {
        self.inner.guard_ready()?;
        let conn = self.inner.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                &format!("SELECT payload FROM {} WHERE id = ?1", self.name),
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        payload.map(|p| parse_envelope(id, &p)).transpose()
    }

    /// Returns the sync status of one record, or `None` for unknown ids.
    pub fn status_of(&self, id: &str) -> StoreResult<Option<SyncStatus>> {
        self.inner.guard_ready()?;
        let conn = self.inner.conn.lock();
        let status: Option<String> = conn
            .query_row(
                &format!("SELECT sync_status FROM {} WHERE id = ?1", self.name),
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match status {
            None => Ok(None),
            Some(s) => SyncStatus::parse(&s)
                .map(Some)
                .ok_or_else(|| StoreError::Corrupt {
                    id: id.to_string(),
                    reason: format!("unknown sync status {s:?}"),
                }),
        }
    }

    /// Returns all live (non-tombstoned) records, oldest first.
    pub fn live_records(&self) -> StoreResult<Vec<RecordEnvelope>> {
        self.inner.guard_ready()?;
        let conn = self.inner.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, payload FROM {}
                 WHERE sync_status != 'deleted'
                 ORDER BY created_at",
                self.name
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (id, payload) = row.map_err(db_err)?;
            let env = parse_envelope(&id, &payload)?;
            // Remote deletions arrive as synced tombstones.
            if !env.deleted {
                records.push(env);
            }
        }
        Ok(records)
    }

    /// Counts rows whose changes the remote has not yet acknowledged.
    pub fn pending_count(&self) -> StoreResult<usize> {
        self.inner.guard_ready()?;
        let conn = self.inner.conn.lock();
        conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE sync_status != 'synced'",
                self.name
            ),
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as usize)
        .map_err(db_err)
    }
}

impl SyncableTable for SqliteTable {
    fn remote_name(&self) -> &str {
        &self.name
    }

    fn dirty_records(&self) -> StoreResult<Vec<RecordEnvelope>> {
        self.inner.guard_ready()?;
        let conn = self.inner.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, payload, sync_status FROM {}
                 WHERE sync_status IN ('dirty', 'deleted')
                 ORDER BY updated_at",
                self.name
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            let (id, payload, status) = row.map_err(db_err)?;
            let mut env = parse_envelope(&id, &payload)?;
            // The tombstone travels inside the pushed payload.
            if status == SyncStatus::Deleted.as_str() {
                env.deleted = true;
            }
            records.push(env);
        }
        Ok(records)
    }

    fn mark_synced(&self, ids: &[String]) -> StoreResult<()> {
        self.inner.guard_ready()?;
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.inner.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        for id in ids {
            tx.execute(
                &format!("UPDATE {} SET sync_status = 'synced' WHERE id = ?1", self.name),
                params![id],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)
    }

    fn upsert_from_remote(&self, incoming: &RecordEnvelope) -> StoreResult<()> {
        self.inner.guard_ready()?;
        let conn = self.inner.conn.lock();

        let local_updated_at: Option<String> = conn
            .query_row(
                &format!("SELECT updated_at FROM {} WHERE id = ?1", self.name),
                params![incoming.id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        // Last-write-wins on the freshness marker; the local row wins ties.
        if let Some(local) = &local_updated_at {
            if !incoming.is_newer_than(local) {
                debug!(table = %self.name, id = %incoming.id, "discarding stale remote record");
                return Ok(());
            }
        }

        let payload = serde_json::to_string(incoming)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, payload, sync_status, updated_at, created_at)
                 VALUES (?1, ?2, 'synced', ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    payload = excluded.payload,
                    sync_status = excluded.sync_status,
                    updated_at = excluded.updated_at,
                    created_at = excluded.created_at",
                self.name
            ),
            params![incoming.id, payload, incoming.updated_at, incoming.created_at],
        )
        .map_err(db_err)?;
        Ok(())
    }
}
