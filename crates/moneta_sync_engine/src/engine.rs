//! The push/pull sync cycle.

use crate::error::{SyncError, SyncResult};
use crate::network::NetworkMonitor;
use crate::remote::{RemoteRow, RemoteStore};
use moneta_core::{
    now_timestamp, IdentityProvider, PrincipalId, SettingsStore, SyncableTable,
    LAST_SYNCED_AT_KEY,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one sync cycle.
///
/// `success` means the cycle ran to completion, including the cursor
/// advance. Per-table push/pull failures do not fail the cycle; the first
/// one is carried in `error` as an advisory message and the affected rows
/// simply stay dirty or stale until the next cycle retries them.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Whether the cycle ran to completion.
    pub success: bool,
    /// First per-table error encountered, if any. Advisory only.
    pub error: Option<String>,
    /// Number of records pushed.
    pub pushed: u64,
    /// Number of remote records applied locally.
    pub pulled: u64,
    /// The cycle's start time; becomes the sync cursor on completion.
    pub started_at: String,
}

impl SyncReport {
    fn skipped(started_at: String) -> Self {
        Self {
            success: true,
            error: None,
            pushed: 0,
            pulled: 0,
            started_at,
        }
    }
}

/// Runs full synchronization cycles: push local dirty records, pull remote
/// changes since the cursor, advance the cursor.
///
/// Constructed once with injected dependencies so tests can substitute
/// fakes. The engine re-checks identity and connectivity itself before any
/// I/O, independent of the coordinator's gating, so it is safe to call
/// directly.
pub struct SyncEngine {
    tables: Vec<Arc<dyn SyncableTable>>,
    remote: Arc<dyn RemoteStore>,
    network: Arc<NetworkMonitor>,
    identity: Arc<dyn IdentityProvider>,
    settings: Arc<dyn SettingsStore>,
}

impl SyncEngine {
    /// Creates an engine over the given tables, processed in the order
    /// given. The order is fixed and deterministic across cycles.
    pub fn new(
        tables: Vec<Arc<dyn SyncableTable>>,
        remote: Arc<dyn RemoteStore>,
        network: Arc<NetworkMonitor>,
        identity: Arc<dyn IdentityProvider>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            tables,
            remote,
            network,
            identity,
            settings,
        }
    }

    /// Runs one full cycle: push phase, pull phase, cursor advance.
    ///
    /// Precondition failures ([`SyncError::Unauthenticated`],
    /// [`SyncError::Offline`]) short-circuit before any I/O. Table
    /// iteration is sequential in declared order, push always before pull.
    pub async fn run_cycle(&self) -> SyncResult<SyncReport> {
        let principal = self
            .identity
            .current_principal()
            .ok_or(SyncError::Unauthenticated)?;
        if !self.network.check_connection().await {
            return Err(SyncError::Offline);
        }

        // Captured before the push so remote writes landing mid-cycle are
        // still inside the next pull's window.
        let cycle_start = now_timestamp();

        let cursor = match self.settings.get_setting(LAST_SYNCED_AT_KEY) {
            Ok(value) => value,
            Err(err) if err.is_not_ready() => {
                debug!("store not ready, nothing to sync yet");
                return Ok(SyncReport::skipped(cycle_start));
            }
            Err(err) => return Err(err.into()),
        };

        let mut errors: Vec<SyncError> = Vec::new();

        let mut pushed = 0;
        for table in &self.tables {
            match self.push_table(table.as_ref(), &principal).await {
                Ok(count) => pushed += count,
                Err(err) => {
                    warn!(table = table.remote_name(), error = %err, "push failed");
                    errors.push(err);
                }
            }
        }

        let mut pulled = 0;
        for table in &self.tables {
            match self
                .pull_table(table.as_ref(), &principal, cursor.as_deref())
                .await
            {
                Ok(count) => pulled += count,
                Err(err) => {
                    warn!(table = table.remote_name(), error = %err, "pull failed");
                    errors.push(err);
                }
            }
        }

        // The cursor only ever moves forward.
        let new_cursor = match &cursor {
            Some(existing) if existing.as_str() >= cycle_start.as_str() => existing.clone(),
            _ => cycle_start.clone(),
        };
        self.settings
            .set_setting(LAST_SYNCED_AT_KEY, &new_cursor)
            .map_err(SyncError::CursorPersist)?;

        info!(pushed, pulled, soft_errors = errors.len(), "sync cycle completed");
        Ok(SyncReport {
            success: true,
            error: errors.first().map(ToString::to_string),
            pushed,
            pulled,
            started_at: cycle_start,
        })
    }

    /// Counts records across all tables whose changes have not been
    /// acknowledged. A not-ready table contributes zero.
    pub fn pending_changes(&self) -> usize {
        self.tables
            .iter()
            .map(|table| match table.dirty_records() {
                Ok(records) => records.len(),
                Err(err) => {
                    debug!(table = table.remote_name(), error = %err, "pending count unavailable");
                    0
                }
            })
            .sum()
    }

    async fn push_table(
        &self,
        table: &dyn SyncableTable,
        principal: &PrincipalId,
    ) -> SyncResult<u64> {
        let dirty = match table.dirty_records() {
            Ok(records) => records,
            Err(err) if err.is_not_ready() => {
                debug!(table = table.remote_name(), "table not ready, skipping push");
                return Ok(0);
            }
            Err(err) => return Err(err.into()),
        };
        if dirty.is_empty() {
            return Ok(0);
        }

        // Snapshot the ids before sending: a concurrent local write landing
        // after this point must stay dirty for the next cycle.
        let ids: Vec<String> = dirty.iter().map(|record| record.id.clone()).collect();
        let rows: Vec<RemoteRow> = dirty
            .into_iter()
            .map(|record| RemoteRow::new(principal, record))
            .collect();

        self.remote
            .upsert_batch(table.remote_name(), &rows)
            .await
            .map_err(|source| SyncError::RemoteWrite {
                table: table.remote_name().to_string(),
                source,
            })?;

        table.mark_synced(&ids)?;
        debug!(table = table.remote_name(), count = ids.len(), "pushed batch");
        Ok(ids.len() as u64)
    }

    async fn pull_table(
        &self,
        table: &dyn SyncableTable,
        principal: &PrincipalId,
        cursor: Option<&str>,
    ) -> SyncResult<u64> {
        let rows = self
            .remote
            .query_updated_since(table.remote_name(), principal, cursor)
            .await
            .map_err(|source| SyncError::RemoteRead {
                table: table.remote_name().to_string(),
                source,
            })?;

        let mut applied = 0;
        for row in &rows {
            match table.upsert_from_remote(&row.record) {
                Ok(()) => applied += 1,
                Err(err) if err.is_not_ready() => {
                    debug!(table = table.remote_name(), "table not ready, skipping pull");
                    return Ok(applied);
                }
                Err(err) => return Err(err.into()),
            }
        }
        if applied > 0 {
            debug!(table = table.remote_name(), count = applied, "applied remote batch");
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::StaticProbe;
    use crate::remote::MockRemote;
    use moneta_core::{RecordEnvelope, StaticIdentity, SyncStatus};
    use moneta_store::{MemorySettings, MemoryTable};

    struct Harness {
        remote: Arc<MockRemote>,
        probe: Arc<StaticProbe>,
        identity: Arc<StaticIdentity>,
        settings: Arc<MemorySettings>,
        engine: SyncEngine,
    }

    fn harness(tables: Vec<Arc<MemoryTable>>) -> Harness {
        let remote = Arc::new(MockRemote::new());
        let probe = Arc::new(StaticProbe::new(true));
        let identity = Arc::new(StaticIdentity::signed_in(PrincipalId::new("alice")));
        let settings = Arc::new(MemorySettings::new());
        let network = Arc::new(NetworkMonitor::new(probe.clone()));

        let engine = SyncEngine::new(
            tables
                .into_iter()
                .map(|t| t as Arc<dyn SyncableTable>)
                .collect(),
            remote.clone(),
            network,
            identity.clone(),
            settings.clone(),
        );
        Harness {
            remote,
            probe,
            identity,
            settings,
            engine,
        }
    }

    fn account(balance: i64) -> RecordEnvelope {
        let mut fields = serde_json::Map::new();
        fields.insert("balance".into(), serde_json::json!(balance));
        RecordEnvelope::new(fields)
    }

    fn cursor(h: &Harness) -> Option<String> {
        h.settings.get_setting(LAST_SYNCED_AT_KEY).unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_short_circuits() {
        let table = Arc::new(MemoryTable::new("accounts"));
        table.save(&account(100)).unwrap();
        let h = harness(vec![table]);
        h.identity.sign_out();

        let result = h.engine.run_cycle().await;
        assert!(matches!(result, Err(SyncError::Unauthenticated)));
        assert_eq!(h.remote.upsert_calls(), 0);
        assert_eq!(h.remote.query_calls(), 0);
        assert_eq!(cursor(&h), None);
    }

    #[tokio::test]
    async fn offline_short_circuits() {
        let table = Arc::new(MemoryTable::new("accounts"));
        table.save(&account(100)).unwrap();
        let h = harness(vec![table]);
        h.probe.set_connected(false);

        let result = h.engine.run_cycle().await;
        assert!(matches!(result, Err(SyncError::Offline)));
        assert_eq!(h.remote.upsert_calls(), 0);
        assert_eq!(cursor(&h), None);
    }

    #[tokio::test]
    async fn first_cycle_round_trips_and_second_is_quiet() {
        let table = Arc::new(MemoryTable::new("accounts"));
        let saved = table.save(&account(100)).unwrap();
        let h = harness(vec![table.clone()]);

        let report = h.engine.run_cycle().await.unwrap();
        assert!(report.success);
        assert_eq!(report.error, None);
        assert_eq!(report.pushed, 1);

        let remote_row = h.remote.row("accounts", &saved.id).unwrap();
        assert_eq!(remote_row.record.fields["balance"], 100);
        assert_eq!(remote_row.principal_id, "alice");
        assert_eq!(remote_row.record.updated_at, saved.updated_at);
        assert_eq!(
            table.status_of(&saved.id).unwrap(),
            Some(SyncStatus::Synced)
        );
        let first_cursor = cursor(&h).unwrap();

        // Second cycle: nothing dirty, so zero upserts of consequence.
        let report = h.engine.run_cycle().await.unwrap();
        assert!(report.success);
        assert_eq!(report.pushed, 0);
        assert_eq!(h.remote.upsert_calls(), 1);

        // Cursor monotonicity across cycles.
        let second_cursor = cursor(&h).unwrap();
        assert!(second_cursor >= first_cursor);
    }

    #[tokio::test]
    async fn pull_uses_pre_cycle_cursor() {
        let table = Arc::new(MemoryTable::new("accounts"));
        let h = harness(vec![table]);

        h.engine.run_cycle().await.unwrap();
        assert_eq!(h.remote.last_query_since("accounts"), Some(None));
        let first_cursor = cursor(&h).unwrap();

        h.engine.run_cycle().await.unwrap();
        assert_eq!(
            h.remote.last_query_since("accounts"),
            Some(Some(first_cursor))
        );
    }

    #[tokio::test]
    async fn push_failure_is_isolated_per_table() {
        let accounts = Arc::new(MemoryTable::new("accounts"));
        let transactions = Arc::new(MemoryTable::new("transactions"));
        let a = accounts.save(&account(1)).unwrap();
        let t = transactions.save(&account(2)).unwrap();

        let h = harness(vec![accounts.clone(), transactions.clone()]);
        h.remote.fail_upserts("transactions", true);

        let report = h.engine.run_cycle().await.unwrap();
        assert!(report.success);
        assert!(report.error.as_deref().unwrap().contains("transactions"));
        assert_eq!(accounts.status_of(&a.id).unwrap(), Some(SyncStatus::Synced));
        assert_eq!(
            transactions.status_of(&t.id).unwrap(),
            Some(SyncStatus::Dirty)
        );

        // Retry heals the failed table.
        h.remote.fail_upserts("transactions", false);
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.error, None);
        assert_eq!(
            transactions.status_of(&t.id).unwrap(),
            Some(SyncStatus::Synced)
        );
    }

    #[tokio::test]
    async fn pull_failure_is_isolated_per_table() {
        let accounts = Arc::new(MemoryTable::new("accounts"));
        let transactions = Arc::new(MemoryTable::new("transactions"));
        let h = harness(vec![accounts.clone(), transactions.clone()]);

        let alice = PrincipalId::new("alice");
        let mut acct = account(10);
        acct.updated_at = "9999-01-01T00:00:00.000000Z".into();
        let mut txn = account(20);
        txn.updated_at = "9999-01-01T00:00:00.000000Z".into();
        h.remote.seed("accounts", RemoteRow::new(&alice, acct.clone()));
        h.remote.seed("transactions", RemoteRow::new(&alice, txn.clone()));
        h.remote.fail_queries("transactions", true);

        let report = h.engine.run_cycle().await.unwrap();
        assert!(report.success);
        assert!(report.error.as_deref().unwrap().contains("transactions"));
        assert_eq!(report.pulled, 1);
        assert!(accounts.get(&acct.id).unwrap().is_some());
        assert!(transactions.get(&txn.id).unwrap().is_none());

        // Retry heals the failed table.
        h.remote.fail_queries("transactions", false);
        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.error, None);
        let row = transactions.get(&txn.id).unwrap().unwrap();
        assert_eq!(row.fields["balance"], 20);
    }

    #[tokio::test]
    async fn write_landing_mid_push_stays_dirty() {
        let table = Arc::new(MemoryTable::new("accounts"));
        let snapshot_row = table.save(&account(1)).unwrap();
        let h = harness(vec![table.clone()]);

        // While the batch is in flight, another record becomes dirty.
        let race_table = table.clone();
        let late = account(2);
        let late_id = late.id.clone();
        h.remote.set_upsert_hook(move |_| {
            race_table.save(&late).unwrap();
        });

        h.engine.run_cycle().await.unwrap();

        // Only the pre-snapshot id was marked synced.
        assert_eq!(
            table.status_of(&snapshot_row.id).unwrap(),
            Some(SyncStatus::Synced)
        );
        assert_eq!(table.status_of(&late_id).unwrap(), Some(SyncStatus::Dirty));
        assert!(h.remote.row("accounts", &late_id).is_none());
    }

    #[tokio::test]
    async fn newer_remote_row_wins_conflict() {
        let table = Arc::new(MemoryTable::new("accounts"));
        let mut local = account(100);
        local.updated_at = "2025-01-02T00:00:00.000000Z".into();
        table.upsert_from_remote(&local).unwrap(); // synced local row at T1

        let h = harness(vec![table.clone()]);
        let mut remote_version = local.clone();
        remote_version.updated_at = "2025-01-03T00:00:00.000000Z".into();
        remote_version
            .fields
            .insert("balance".into(), serde_json::json!(250));
        h.remote.seed(
            "accounts",
            RemoteRow::new(&PrincipalId::new("alice"), remote_version),
        );

        let report = h.engine.run_cycle().await.unwrap();
        assert_eq!(report.pulled, 1);

        let row = table.get(&local.id).unwrap().unwrap();
        assert_eq!(row.fields["balance"], 250);
        assert_eq!(table.status_of(&local.id).unwrap(), Some(SyncStatus::Synced));
    }

    #[tokio::test]
    async fn not_ready_table_is_nothing_to_sync() {
        let table = Arc::new(MemoryTable::not_ready("accounts"));
        let h = harness(vec![table]);

        let report = h.engine.run_cycle().await.unwrap();
        assert!(report.success);
        assert_eq!(report.pushed, 0);
        assert_eq!(h.remote.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn cursor_persist_failure_is_fatal() {
        let table = Arc::new(MemoryTable::new("accounts"));
        let saved = table.save(&account(100)).unwrap();
        let h = harness(vec![table.clone()]);
        h.settings.fail_writes(true);

        let result = h.engine.run_cycle().await;
        assert!(matches!(result, Err(SyncError::CursorPersist(_))));

        // Data movement happened before the failure.
        assert!(h.remote.row("accounts", &saved.id).is_some());
        assert_eq!(cursor(&h), None);
    }

    #[tokio::test]
    async fn cursor_never_regresses() {
        let table = Arc::new(MemoryTable::new("accounts"));
        let h = harness(vec![table]);
        let future = "9999-01-01T00:00:00.000000Z";
        h.settings.set_setting(LAST_SYNCED_AT_KEY, future).unwrap();

        h.engine.run_cycle().await.unwrap();
        assert_eq!(cursor(&h).as_deref(), Some(future));
    }

    #[tokio::test]
    async fn deletions_push_tombstones() {
        let table = Arc::new(MemoryTable::new("accounts"));
        let saved = table.save(&account(100)).unwrap();
        table.delete(&saved.id).unwrap();
        let h = harness(vec![table.clone()]);

        h.engine.run_cycle().await.unwrap();

        let remote_row = h.remote.row("accounts", &saved.id).unwrap();
        assert!(remote_row.record.deleted);
        assert_eq!(
            table.status_of(&saved.id).unwrap(),
            Some(SyncStatus::Synced)
        );
    }

    #[tokio::test]
    async fn pending_changes_sums_tables() {
        let accounts = Arc::new(MemoryTable::new("accounts"));
        let transactions = Arc::new(MemoryTable::new("transactions"));
        let not_ready = Arc::new(MemoryTable::not_ready("budgets"));
        accounts.save(&account(1)).unwrap();
        let gone = transactions.save(&account(2)).unwrap();
        transactions.delete(&gone.id).unwrap();

        let h = harness(vec![accounts, transactions, not_ready]);
        assert_eq!(h.engine.pending_changes(), 2);
    }
}
