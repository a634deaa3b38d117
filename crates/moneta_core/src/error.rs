//! Error types for local storage.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur against the local record store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store has not completed initialization.
    ///
    /// Callers performing background work (such as the sync engine) should
    /// treat this as "nothing to sync yet" rather than a hard failure.
    #[error("store is not ready")]
    NotReady,

    /// Underlying database error.
    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be interpreted as a record envelope.
    #[error("corrupt record {id}: {reason}")]
    Corrupt {
        /// Record id.
        id: String,
        /// What failed to parse.
        reason: String,
    },

    /// JSON serialization of a record payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The given table name is not a valid identifier.
    #[error("invalid table name: {0}")]
    InvalidTableName(String),
}

impl StoreError {
    /// Returns true if the error means the store simply is not ready yet.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, StoreError::NotReady)
    }
}
