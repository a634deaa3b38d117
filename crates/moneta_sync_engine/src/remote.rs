//! Remote store abstraction and in-memory mock.

use async_trait::async_trait;
use moneta_core::{PrincipalId, RecordEnvelope};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Result type for remote store operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Typed failures surfaced by the remote store client.
///
/// Network-level problems never cross component boundaries as raw transport
/// errors; they arrive here so the engine can decide what is retryable.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The backend rejected the request.
    #[error("remote API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The request never completed (DNS, TLS, connection reset, ...).
    #[error("network error: {0}")]
    Network(String),

    /// The client-side request timeout fired.
    #[error("request timed out")]
    Timeout,

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Returns true if retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout => true,
            RemoteError::Api { status, .. } => *status == 429 || *status >= 500,
            RemoteError::Decode(_) => false,
        }
    }
}

/// One row as it travels to and from the remote store: the record envelope
/// plus the owning principal id the backend scopes rows by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    /// Owning principal; attached on writes, filtered on reads.
    pub principal_id: String,
    /// The record itself.
    #[serde(flatten)]
    pub record: RecordEnvelope,
}

impl RemoteRow {
    /// Wraps a record for the given principal.
    pub fn new(principal: &PrincipalId, record: RecordEnvelope) -> Self {
        Self {
            principal_id: principal.as_str().to_string(),
            record,
        }
    }
}

/// The remote store client consumed by the sync engine.
///
/// All calls are scoped to the authenticated principal: writes attach the
/// principal id, reads filter on it. Implementations must impose their own
/// request timeout, or a hung call blocks the whole cycle.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Bulk-upserts rows into a table, keyed by record id (`on_conflict: id`).
    async fn upsert_batch(&self, table: &str, rows: &[RemoteRow]) -> RemoteResult<()>;

    /// Returns the principal's rows with `updated_at` strictly greater than
    /// `since`. `None` returns everything the principal owns.
    async fn query_updated_since(
        &self,
        table: &str,
        principal: &PrincipalId,
        since: Option<&str>,
    ) -> RemoteResult<Vec<RemoteRow>>;
}

type UpsertHook = Box<dyn Fn(&str) + Send + Sync>;

/// An in-memory remote store for tests.
///
/// Supports per-table failure injection, injected latency, call counting,
/// and an upsert hook that fires while a push batch is "in flight" (for
/// exercising races with concurrent local writes).
#[derive(Default)]
pub struct MockRemote {
    tables: Mutex<HashMap<String, BTreeMap<String, RemoteRow>>>,
    fail_upserts: Mutex<HashSet<String>>,
    fail_queries: Mutex<HashSet<String>>,
    last_query_since: Mutex<HashMap<String, Option<String>>>,
    upsert_calls: AtomicU64,
    query_calls: AtomicU64,
    latency: Mutex<Option<Duration>>,
    upsert_hook: Mutex<Option<UpsertHook>>,
}

impl MockRemote {
    /// Creates an empty mock remote.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a row directly, bypassing counters.
    pub fn seed(&self, table: &str, row: RemoteRow) {
        self.tables
            .lock()
            .entry(table.to_string())
            .or_default()
            .insert(row.record.id.clone(), row);
    }

    /// Returns all rows currently stored for a table.
    pub fn rows(&self, table: &str) -> Vec<RemoteRow> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns one row by id.
    pub fn row(&self, table: &str, id: &str) -> Option<RemoteRow> {
        self.tables.lock().get(table).and_then(|t| t.get(id).cloned())
    }

    /// Number of upsert batches received.
    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// Number of pull queries received.
    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// The `since` bound of the most recent query against a table.
    pub fn last_query_since(&self, table: &str) -> Option<Option<String>> {
        self.last_query_since.lock().get(table).cloned()
    }

    /// Makes upserts against `table` fail with a network error.
    pub fn fail_upserts(&self, table: &str, fail: bool) {
        let mut set = self.fail_upserts.lock();
        if fail {
            set.insert(table.to_string());
        } else {
            set.remove(table);
        }
    }

    /// Makes queries against `table` fail with a network error.
    pub fn fail_queries(&self, table: &str, fail: bool) {
        let mut set = self.fail_queries.lock();
        if fail {
            set.insert(table.to_string());
        } else {
            set.remove(table);
        }
    }

    /// Adds artificial latency to every call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Installs a hook invoked while an upsert batch is in flight, before it
    /// is applied. Receives the table name.
    pub fn set_upsert_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.upsert_hook.lock() = Some(Box::new(hook));
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn upsert_batch(&self, table: &str, rows: &[RemoteRow]) -> RemoteResult<()> {
        self.simulate_latency().await;
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(hook) = self.upsert_hook.lock().as_ref() {
            hook(table);
        }

        if self.fail_upserts.lock().contains(table) {
            return Err(RemoteError::Network("injected upsert failure".into()));
        }

        let mut tables = self.tables.lock();
        let stored = tables.entry(table.to_string()).or_default();
        for row in rows {
            stored.insert(row.record.id.clone(), row.clone());
        }
        Ok(())
    }

    async fn query_updated_since(
        &self,
        table: &str,
        principal: &PrincipalId,
        since: Option<&str>,
    ) -> RemoteResult<Vec<RemoteRow>> {
        self.simulate_latency().await;
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.last_query_since
            .lock()
            .insert(table.to_string(), since.map(ToString::to_string));

        if self.fail_queries.lock().contains(table) {
            return Err(RemoteError::Network("injected query failure".into()));
        }

        Ok(self
            .tables
            .lock()
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| row.principal_id == principal.as_str())
                    .filter(|row| match since {
                        Some(since) => row.record.updated_at.as_str() > since,
                        None => true,
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(principal: &str, id: &str, updated_at: &str) -> RemoteRow {
        let mut record = RecordEnvelope::new(serde_json::Map::new());
        record.id = id.to_string();
        record.updated_at = updated_at.to_string();
        RemoteRow {
            principal_id: principal.to_string(),
            record,
        }
    }

    #[test]
    fn retryable_remote_errors() {
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Network("reset".into()).is_retryable());
        assert!(RemoteError::Api {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!RemoteError::Api {
            status: 401,
            message: "unauthorized".into()
        }
        .is_retryable());
        assert!(!RemoteError::Decode("garbage".into()).is_retryable());
    }

    #[test]
    fn remote_row_serializes_flat() {
        let principal = PrincipalId::new("alice");
        let mut fields = serde_json::Map::new();
        fields.insert("balance".into(), serde_json::json!(7));
        let row = RemoteRow::new(&principal, RecordEnvelope::new(fields));

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["principal_id"], "alice");
        assert_eq!(json["balance"], 7);
        assert!(json["record"].is_null());
    }

    #[tokio::test]
    async fn mock_scopes_queries_by_principal_and_cursor() {
        let remote = MockRemote::new();
        remote.seed("accounts", row("alice", "a1", "2025-01-01T00:00:00.000000Z"));
        remote.seed("accounts", row("alice", "a2", "2025-01-03T00:00:00.000000Z"));
        remote.seed("accounts", row("bob", "b1", "2025-01-05T00:00:00.000000Z"));

        let alice = PrincipalId::new("alice");
        let all = remote
            .query_updated_since("accounts", &alice, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let newer = remote
            .query_updated_since("accounts", &alice, Some("2025-01-02T00:00:00.000000Z"))
            .await
            .unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].record.id, "a2");

        assert_eq!(
            remote.last_query_since("accounts"),
            Some(Some("2025-01-02T00:00:00.000000Z".to_string()))
        );
    }

    #[tokio::test]
    async fn mock_failure_injection() {
        let remote = MockRemote::new();
        remote.fail_upserts("accounts", true);

        let alice = PrincipalId::new("alice");
        let result = remote
            .upsert_batch("accounts", &[row("alice", "a1", "2025-01-01T00:00:00.000000Z")])
            .await;
        assert!(matches!(result, Err(RemoteError::Network(_))));
        assert_eq!(remote.upsert_calls(), 1);
        assert!(remote.rows("accounts").is_empty());

        remote.fail_upserts("accounts", false);
        remote
            .upsert_batch("accounts", &[row("alice", "a1", "2025-01-01T00:00:00.000000Z")])
            .await
            .unwrap();
        assert_eq!(
            remote
                .query_updated_since("accounts", &alice, None)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
