//! Storage contracts consumed by the sync engine.

use crate::error::StoreResult;
use crate::identity::PrincipalId;
use crate::record::RecordEnvelope;

/// Settings key holding the sync cursor: the exclusive lower bound for the
/// next pull. Created on the first successful cycle and advanced only after
/// both push and pull succeed.
pub const LAST_SYNCED_AT_KEY: &str = "last_synced_at";

/// Returns the settings key marking a principal's local data as migrated.
pub fn principal_marker_key(principal: &PrincipalId) -> String {
    format!("principal_migrated_{}", principal.as_str())
}

/// One syncable entity table, as seen by the sync engine.
///
/// The engine is generic over this contract: each entity (accounts,
/// transactions, budgets, ...) registers one implementation and the engine
/// runs the same push/pull control flow against all of them in a fixed order.
///
/// Implementations must be idempotent where documented: retrying a sync cycle
/// after a partial failure replays the same calls.
pub trait SyncableTable: Send + Sync {
    /// The table name used on the remote store.
    fn remote_name(&self) -> &str;

    /// Returns all rows whose status is dirty or deleted.
    fn dirty_records(&self) -> StoreResult<Vec<RecordEnvelope>>;

    /// Marks the given ids as synced. Idempotent; unknown ids are ignored.
    fn mark_synced(&self, ids: &[String]) -> StoreResult<()>;

    /// Applies a remote record under last-write-wins conflict resolution.
    ///
    /// If no local row with the same id exists, the record is inserted as
    /// synced. If one exists, the incoming record is applied (and the row
    /// marked synced) only when its `updated_at` is strictly greater than the
    /// local one; otherwise it is discarded. Safe to call repeatedly with the
    /// same payload.
    fn upsert_from_remote(&self, incoming: &RecordEnvelope) -> StoreResult<()>;
}

/// Scalar persisted key-value storage.
///
/// Used for the sync cursor and per-principal migration markers.
pub trait SettingsStore: Send + Sync {
    /// Reads a setting, returning `None` if it was never written.
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a setting, replacing any previous value.
    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()>;
}
