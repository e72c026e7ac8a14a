//! Configuration for the WebSocket transport task

use livesync_core::{BackoffConfig, SyncConfig, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsTransportConfig {
    /// Limit on TCP connect plus WebSocket handshake
    pub connect_timeout: Duration,
    /// Re-establish the link on its own after it drops
    pub auto_reconnect: bool,
    /// Delays between connection attempts, also applied after a link drops
    pub backoff: BackoffConfig,
    /// Uptime after which a link counts as healthy even if no frame arrived;
    /// only a healthy link resets the backoff
    pub stable_after: Duration,
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            auto_reconnect: true,
            backoff: BackoffConfig::default(),
            stable_after: Duration::from_secs(5),
        }
    }
}

impl WsTransportConfig {
    /// Take the reconnect policy from an engine configuration
    pub fn from_sync_config(config: &SyncConfig) -> Self {
        Self {
            backoff: config.reconnect.clone(),
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_stable_after(mut self, uptime: Duration) -> Self {
        self.stable_after = uptime;
        self
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.connect_timeout.is_zero() {
            return Err(livesync_core::SyncError::config_error(
                "connect_timeout must be non-zero",
            ));
        }
        self.backoff.validate()
    }
}
