//! # Moneta Store
//!
//! Local record stores implementing the contracts in `moneta_core`.
//!
//! This crate provides:
//! - [`SqliteStore`] / [`SqliteTable`]: the production store, one uniform
//!   SQLite table per entity plus a key-value settings table
//! - [`MemoryTable`] / [`MemorySettings`]: in-memory equivalents for tests
//!   and embedders that bring their own persistence
//!
//! Every operation against a store that has not completed initialization
//! fails fast with `StoreError::NotReady`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod memory;
mod sqlite;

pub use memory::{MemorySettings, MemoryTable};
pub use sqlite::{SqliteStore, SqliteTable};
