//! Configuration for the sync engine and coordinator.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote store (e.g. `https://api.moneta.example`).
    pub base_url: String,
    /// API key sent with every request, if the backend requires one.
    pub api_key: Option<String>,
    /// Client-side request timeout. The engine has no cancellation of its
    /// own; a hung call blocks the cycle until this fires.
    pub request_timeout: Duration,
    /// Window in which rapid app-foreground triggers collapse into one cycle.
    pub debounce_window: Duration,
}

impl SyncConfig {
    /// Creates a configuration with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
            debounce_window: Duration::from_secs(1),
        }
    }

    /// Sets the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the foreground-trigger debounce window.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }
}
