//! Trigger handling and single-flight execution around the engine.

use crate::engine::{SyncEngine, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::network::NetworkMonitor;
use moneta_core::IdentityProvider;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Coordinator status as broadcast to the UI.
///
/// Terminal states (`Success`, `Error`) are always followed by `Idle` before
/// the next trigger can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle running.
    Idle,
    /// A cycle is in flight.
    Syncing,
    /// The last cycle completed.
    Success,
    /// The last cycle failed with the given message.
    Error(String),
}

/// What caused a sync cycle to be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Connectivity transitioned offline to online.
    ConnectivityRegained,
    /// The app came back to the foreground.
    AppForegrounded,
    /// A sign-in completed.
    SignedIn,
    /// The user explicitly asked for a sync.
    Manual,
}

/// Decides *when* the engine runs and guarantees at most one cycle at a
/// time.
///
/// A trigger arriving while a cycle is in flight is rejected with
/// [`SyncError::AlreadySyncing`], never queued; callers treat that as
/// retryable. The in-flight guard is an RAII lock, so any exit path from a
/// cycle returns the coordinator to idle.
pub struct SyncCoordinator {
    engine: Arc<SyncEngine>,
    identity: Arc<dyn IdentityProvider>,
    running: tokio::sync::Mutex<()>,
    status_tx: broadcast::Sender<SyncState>,
    current: RwLock<SyncState>,
    last_synced_at: RwLock<Option<String>>,
    pending: AtomicU64,
    debounce_window: Duration,
    foreground_gen: AtomicU64,
}

impl SyncCoordinator {
    /// Creates a coordinator around an engine.
    pub fn new(
        engine: Arc<SyncEngine>,
        identity: Arc<dyn IdentityProvider>,
        debounce_window: Duration,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(32);
        Self {
            engine,
            identity,
            running: tokio::sync::Mutex::new(()),
            status_tx,
            current: RwLock::new(SyncState::Idle),
            last_synced_at: RwLock::new(None),
            pending: AtomicU64::new(0),
            debounce_window,
            foreground_gen: AtomicU64::new(0),
        }
    }

    /// Subscribes to the status stream. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncState> {
        self.status_tx.subscribe()
    }

    /// Returns the current status.
    pub fn state(&self) -> SyncState {
        self.current.read().clone()
    }

    /// Timestamp of the last successful cycle, for UI display.
    pub fn last_synced_at(&self) -> Option<String> {
        self.last_synced_at.read().clone()
    }

    /// Count of records not yet acknowledged by the remote, as of the last
    /// completed cycle (see [`SyncCoordinator::refresh_pending_changes`]).
    pub fn pending_changes(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Recomputes the pending-change count outside a cycle, e.g. after a
    /// burst of local edits.
    pub fn refresh_pending_changes(&self) -> u64 {
        let count = self.engine.pending_changes() as u64;
        self.pending.store(count, Ordering::SeqCst);
        count
    }

    /// Explicit user request. Bypasses the debounce window, subject only to
    /// the single-flight guard.
    pub async fn request_sync(&self) -> SyncResult<SyncReport> {
        self.run(SyncTrigger::Manual).await
    }

    /// Sign-in completed; runs one cycle.
    pub async fn on_signed_in(&self) -> SyncResult<SyncReport> {
        self.run(SyncTrigger::SignedIn).await
    }

    /// Connectivity transition reported by the network monitor. Runs a
    /// cycle immediately when connectivity was regained and an identity is
    /// present.
    pub async fn on_connectivity_changed(&self, connected: bool) -> SyncResult<SyncReport> {
        if !connected {
            return Err(SyncError::Offline);
        }
        if self.identity.current_principal().is_none() {
            debug!("connectivity regained while signed out, skipping sync");
            return Err(SyncError::Unauthenticated);
        }
        self.run(SyncTrigger::ConnectivityRegained).await
    }

    /// App came to the foreground. Debounced: triggers arriving within the
    /// configured window collapse into one cycle, and only the last
    /// survives.
    pub fn on_app_foregrounded(self: &Arc<Self>) {
        let generation = self.foreground_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(coordinator.debounce_window).await;
            if coordinator.foreground_gen.load(Ordering::SeqCst) == generation {
                let _ = coordinator.run(SyncTrigger::AppForegrounded).await;
            }
        });
    }

    /// Spawns a task bridging the monitor's transition stream to the
    /// connectivity trigger.
    pub fn watch_connectivity(self: &Arc<Self>, monitor: &NetworkMonitor) -> JoinHandle<()> {
        let mut rx = monitor.subscribe();
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(connected) = rx.recv().await {
                if connected {
                    let _ = coordinator.on_connectivity_changed(true).await;
                }
            }
        })
    }

    async fn run(&self, trigger: SyncTrigger) -> SyncResult<SyncReport> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!(?trigger, "cycle already in flight, trigger rejected");
            return Err(SyncError::AlreadySyncing);
        };

        info!(?trigger, "sync cycle starting");
        self.set_state(SyncState::Syncing);

        let result = self.engine.run_cycle().await;
        match &result {
            Ok(report) => {
                *self.last_synced_at.write() = Some(report.started_at.clone());
                self.refresh_pending_changes();
                self.set_state(SyncState::Success);
            }
            Err(err) => {
                self.set_state(SyncState::Error(err.to_string()));
            }
        }
        self.set_state(SyncState::Idle);
        result
    }

    fn set_state(&self, state: SyncState) {
        *self.current.write() = state.clone();
        let _ = self.status_tx.send(state);
    }
}
