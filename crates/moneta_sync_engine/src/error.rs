//! Error types for the sync engine.

use crate::remote::RemoteError;
use moneta_core::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while running or triggering a sync cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No connectivity; no I/O was attempted.
    #[error("offline")]
    Offline,

    /// No authenticated principal; no I/O was attempted.
    #[error("not authenticated")]
    Unauthenticated,

    /// A cycle is already running; the trigger was rejected, not queued.
    #[error("sync already in progress")]
    AlreadySyncing,

    /// Pushing one table's batch failed. Non-fatal to the overall cycle.
    #[error("remote write failed for table {table}: {source}")]
    RemoteWrite {
        /// Remote table name.
        table: String,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },

    /// Pulling one table's changes failed. Non-fatal to the overall cycle.
    #[error("remote read failed for table {table}: {source}")]
    RemoteRead {
        /// Remote table name.
        table: String,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },

    /// The sync cursor could not be persisted. Fatal: the next cycle's
    /// correctness depends on the cursor, so the cycle reports failure even
    /// though data movement succeeded.
    #[error("failed to persist sync cursor: {0}")]
    CursorPersist(#[source] StoreError),

    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Returns true if the caller can reasonably retry later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Offline | SyncError::AlreadySyncing => true,
            SyncError::RemoteWrite { source, .. } | SyncError::RemoteRead { source, .. } => {
                source.is_retryable()
            }
            SyncError::Unauthenticated | SyncError::CursorPersist(_) | SyncError::Store(_) => false,
        }
    }
}
