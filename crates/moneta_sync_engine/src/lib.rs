//! # Moneta Sync Engine
//!
//! Offline-first synchronization for Moneta's local record stores.
//!
//! This crate provides:
//! - The push/pull sync cycle over any set of [`SyncableTable`]s
//! - Last-write-wins conflict resolution by freshness timestamp
//! - Sync cursor management
//! - A remote store abstraction with an HTTP implementation and a mock
//! - Connectivity tracking with transition-only notifications
//! - A coordinator wiring triggers, debounce, and single-flight execution
//!
//! ## Architecture
//!
//! The engine implements a **push-then-pull** cycle:
//! 1. Push local dirty records, table by table, in a fixed order
//! 2. Pull remote changes newer than the sync cursor and apply them
//! 3. Advance the cursor to the cycle's start time
//!
//! Local changes propagate before remote state is absorbed, per-table
//! failures self-heal on the next cycle, and the cursor only ever moves
//! forward.
//!
//! ## Key Invariants
//!
//! - Push always precedes pull within a cycle
//! - At most one cycle runs at a time; extra triggers are rejected, not queued
//! - Only the ids snapshotted before a push batch are marked synced
//! - Conflicts resolve last-write-wins; the local row wins ties
//!
//! [`SyncableTable`]: moneta_core::SyncableTable

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod engine;
mod error;
mod http;
mod network;
mod remote;

pub use config::SyncConfig;
pub use coordinator::{SyncCoordinator, SyncState, SyncTrigger};
pub use engine::{SyncEngine, SyncReport};
pub use error::{SyncError, SyncResult};
pub use http::HttpRemote;
pub use network::{ConnectivityProbe, HttpProbe, NetworkMonitor, StaticProbe};
pub use remote::{MockRemote, RemoteError, RemoteResult, RemoteRow, RemoteStore};
