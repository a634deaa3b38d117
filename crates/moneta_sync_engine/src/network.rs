//! Connectivity tracking.

use crate::remote::{RemoteError, RemoteResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Answers "does the device currently have connectivity?".
///
/// Implementations back the monitor's on-demand polling; OS-level push
/// notifications of connectivity change go through
/// [`NetworkMonitor::push_update`] instead.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Performs one fresh connectivity check.
    async fn check(&self) -> bool;
}

/// A probe with a fixed, toggleable answer. Used in tests and by embedders
/// that feed connectivity in purely via [`NetworkMonitor::push_update`].
#[derive(Debug)]
pub struct StaticProbe {
    connected: AtomicBool,
}

impl StaticProbe {
    /// Creates a probe answering `connected`.
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    /// Changes the probe's answer.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn check(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A probe that issues a HEAD request against a health endpoint.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    /// Creates a probe for the given URL with its own short timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RemoteError::Network(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Tracks a single boolean "connected" state.
///
/// The state is refreshed both by [`NetworkMonitor::push_update`] (OS-level
/// change notifications) and by [`NetworkMonitor::check_connection`]
/// (on-demand polling). Subscribers are notified only on actual transitions,
/// never on redundant updates, so a flapping-free signal can drive sync
/// triggers directly.
pub struct NetworkMonitor {
    connected: AtomicBool,
    probe: Arc<dyn ConnectivityProbe>,
    notify: broadcast::Sender<bool>,
}

impl NetworkMonitor {
    /// Creates a monitor. The device is assumed offline until the first
    /// probe or push update says otherwise.
    pub fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        let (notify, _) = broadcast::channel(16);
        Self {
            connected: AtomicBool::new(false),
            probe,
            notify,
        }
    }

    /// Returns the cached connectivity state.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Forces a fresh probe and returns the new state.
    pub async fn check_connection(&self) -> bool {
        let connected = self.probe.check().await;
        self.update(connected);
        connected
    }

    /// Records an OS-level connectivity notification.
    pub fn push_update(&self, connected: bool) {
        self.update(connected);
    }

    /// Subscribes to connectivity transitions. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.notify.subscribe()
    }

    fn update(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous != connected {
            debug!(connected, "connectivity changed");
            let _ = self.notify.send(connected);
        }
    }
}
