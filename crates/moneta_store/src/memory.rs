//! In-memory store for tests and embedders without SQLite.

use moneta_core::{
    now_timestamp, RecordEnvelope, SettingsStore, StoreError, StoreResult, SyncStatus,
    SyncableTable,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
struct StoredRow {
    envelope: RecordEnvelope,
    status: SyncStatus,
}

/// An in-memory [`SyncableTable`] with the same contract as the SQLite
/// store, including the not-ready failure mode.
#[derive(Debug)]
pub struct MemoryTable {
    name: String,
    rows: RwLock<BTreeMap<String, StoredRow>>,
    ready: AtomicBool,
}

impl MemoryTable {
    /// Creates a ready table with the given remote name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(BTreeMap::new()),
            ready: AtomicBool::new(true),
        }
    }

    /// Creates a table that reports [`StoreError::NotReady`] until
    /// [`MemoryTable::set_ready`] is called.
    pub fn not_ready(name: impl Into<String>) -> Self {
        let table = Self::new(name);
        table.ready.store(false, Ordering::SeqCst);
        table
    }

    /// Flips the readiness flag.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn guard_ready(&self) -> StoreResult<()> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotReady)
        }
    }

    /// Saves a locally-edited record, marking it dirty.
    pub fn save(&self, record: &RecordEnvelope) -> StoreResult<RecordEnvelope> {
        self.guard_ready()?;
        let mut rows = self.rows.write();
        let mut stored = record.clone();
        stored.updated_at = now_timestamp();
        if let Some(existing) = rows.get(&stored.id) {
            stored.created_at = existing.envelope.created_at.clone();
        }
        rows.insert(
            stored.id.clone(),
            StoredRow {
                envelope: stored.clone(),
                status: SyncStatus::Dirty,
            },
        );
        Ok(stored)
    }

    /// Tombstones a record. Returns false for unknown ids.
    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        self.guard_ready()?;
        let mut rows = self.rows.write();
        let Some(row) = rows.get_mut(id) else {
            return Ok(false);
        };
        row.envelope.deleted = true;
        row.envelope.updated_at = now_timestamp();
        row.status = SyncStatus::Deleted;
        Ok(true)
    }

    /// Reads one record by id, tombstones included.
    pub fn get(&self, id: &str) -> StoreResult<Option<RecordEnvelope>> {
        self.guard_ready()?;
        Ok(self.rows.read().get(id).map(|r| r.envelope.clone()))
    }

    /// Returns the sync status of one record.
    pub fn status_of(&self, id: &str) -> StoreResult<Option<SyncStatus>> {
        self.guard_ready()?;
        Ok(self.rows.read().get(id).map(|r| r.status))
    }

    /// Returns all live (non-tombstoned) records.
    pub fn live_records(&self) -> StoreResult<Vec<RecordEnvelope>> {
        self.guard_ready()?;
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| r.status != SyncStatus::Deleted && !r.envelope.deleted)
            .map(|r| r.envelope.clone())
            .collect())
    }

    /// Counts rows the remote has not yet acknowledged.
    pub fn pending_count(&self) -> StoreResult<usize> {
        self.guard_ready()?;
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| r.status.is_pending())
            .count())
    }
}

impl SyncableTable for MemoryTable {
    fn remote_name(&self) -> &str {
        &self.name
    }

    fn dirty_records(&self) -> StoreResult<Vec<RecordEnvelope>> {
        self.guard_ready()?;
        Ok(self
            .rows
            .read()
            .values()
            .filter(|r| r.status.is_pending())
            .map(|r| {
                let mut env = r.envelope.clone();
                if r.status == SyncStatus::Deleted {
                    env.deleted = true;
                }
                env
            })
            .collect())
    }

    fn mark_synced(&self, ids: &[String]) -> StoreResult<()> {
        self.guard_ready()?;
        let mut rows = self.rows.write();
        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                row.status = SyncStatus::Synced;
            }
        }
        Ok(())
    }

    fn upsert_from_remote(&self, incoming: &RecordEnvelope) -> StoreResult<()> {
        self.guard_ready()?;
        let mut rows = self.rows.write();
        if let Some(existing) = rows.get(&incoming.id) {
            if !incoming.is_newer_than(&existing.envelope.updated_at) {
                return Ok(());
            }
        }
        rows.insert(
            incoming.id.clone(),
            StoredRow {
                envelope: incoming.clone(),
                status: SyncStatus::Synced,
            },
        );
        Ok(())
    }
}

/// An in-memory [`SettingsStore`] with injectable write failures.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemorySettings {
    /// Creates an empty settings store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail, for exercising cursor-persist failures.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl SettingsStore for MemorySettings {
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("settings write failed".into()));
        }
        self.values
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
