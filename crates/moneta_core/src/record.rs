//! Syncable record envelope and status transitions.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Synchronization status of a local record.
///
/// Every local mutation to business fields moves a record to [`SyncStatus::Dirty`];
/// a local delete moves it to [`SyncStatus::Deleted`] while preserving the row
/// as a tombstone. Only a successful push acknowledgment returns a record to
/// [`SyncStatus::Synced`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The remote store has acknowledged this version of the record.
    Synced,
    /// The record has local changes not yet pushed.
    Dirty,
    /// The record was deleted locally; the row is kept until acknowledged.
    Deleted,
}

impl SyncStatus {
    /// Returns true if the record still needs to be pushed.
    pub fn is_pending(&self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }

    /// Returns the stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Dirty => "dirty",
            SyncStatus::Deleted => "deleted",
        }
    }

    /// Parses the stable storage representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "synced" => Some(SyncStatus::Synced),
            "dirty" => Some(SyncStatus::Dirty),
            "deleted" => Some(SyncStatus::Deleted),
            _ => None,
        }
    }
}

/// The generic view of an entity row that the sync engine moves around.
///
/// Business fields are carried opaquely in `fields`; the engine never inspects
/// them. `updated_at` and `created_at` are RFC 3339 UTC strings produced by
/// [`now_timestamp`], compared as opaque strings (lexicographic order is
/// chronological order for this format).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEnvelope {
    /// Stable, client-generated unique identifier.
    pub id: String,
    /// Freshness marker set by whichever side last wrote the record.
    pub updated_at: String,
    /// Creation timestamp; immutable after insert.
    pub created_at: String,
    /// Deletion tombstone, replicated with the row so deletes propagate.
    #[serde(default)]
    pub deleted: bool,
    /// Opaque business fields (balances, amounts, labels, ...).
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl RecordEnvelope {
    /// Creates a fresh envelope with a new id and current timestamps.
    pub fn new(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        let now = now_timestamp();
        Self {
            id: new_record_id(),
            updated_at: now.clone(),
            created_at: now,
            deleted: false,
            fields,
        }
    }

    /// Returns true if this envelope is fresher than `other_updated_at`.
    ///
    /// Strictly-greater comparison: equal timestamps are not fresher, which
    /// makes the local side win ties during conflict resolution.
    pub fn is_newer_than(&self, other_updated_at: &str) -> bool {
        self.updated_at.as_str() > other_updated_at
    }
}

/// Returns the current UTC time as a fixed-width RFC 3339 string.
///
/// Microsecond precision with a `Z` suffix keeps the representation
/// fixed-width, so string comparison orders timestamps correctly.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Generates a new client-side record id.
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}
