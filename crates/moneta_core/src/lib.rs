//! # Moneta Core
//!
//! Record model and storage contracts for Moneta's offline-first data layer.
//!
//! This crate provides:
//! - The syncable record envelope every entity table stores
//! - Dirty-tracking status transitions (synced / dirty / deleted)
//! - The `SyncableTable` contract consumed by the sync engine
//! - The `SettingsStore` contract used for the sync cursor
//! - The `IdentityProvider` contract gating all sync activity
//!
//! ## Key Invariants
//!
//! - Local writes mark records dirty and refresh `updated_at`
//! - Remote application preserves the remote `updated_at` verbatim
//! - Deletes keep the row as a tombstone until the remote acknowledges it
//! - `updated_at` values are opaque totally-ordered strings

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod identity;
mod record;
mod store;

pub use error::{StoreError, StoreResult};
pub use identity::{IdentityProvider, PrincipalId, StaticIdentity};
pub use record::{new_record_id, now_timestamp, RecordEnvelope, SyncStatus};
pub use store::{principal_marker_key, SettingsStore, SyncableTable, LAST_SYNCED_AT_KEY};
