//! Error types for the WebSocket transport

use livesync_core::SyncError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WsTransportError {
    #[error("Invalid endpoint URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme `{scheme}` (expected ws or wss)")]
    UnsupportedScheme { scheme: String },

    #[error("Credentials cannot be sent as an HTTP header")]
    InvalidCredentials,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Handshake rejected with HTTP {status}: credentials not accepted")]
    AuthRejected { status: u16 },

    #[error("Connection attempt timed out after {after:?}")]
    ConnectTimeout { after: Duration },

    #[error("Transport started without attached channels")]
    ChannelsNotAttached,
}

impl WsTransportError {
    /// Whether retrying the same endpoint can ever succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            WsTransportError::InvalidUrl { .. }
                | WsTransportError::UnsupportedScheme { .. }
                | WsTransportError::InvalidCredentials
                | WsTransportError::AuthRejected { .. }
                | WsTransportError::ChannelsNotAttached
        )
    }
}

impl WsTransportError {
    /// Classify a failed handshake, singling out rejected credentials
    pub fn from_handshake(err: tokio_tungstenite::tungstenite::Error) -> Self {
        if let tokio_tungstenite::tungstenite::Error::Http(response) = &err {
            let status = response.status().as_u16();
            if matches!(status, 401 | 403) {
                return WsTransportError::AuthRejected { status };
            }
        }
        WsTransportError::WebSocket(err)
    }
}

impl From<WsTransportError> for SyncError {
    fn from(err: WsTransportError) -> Self {
        match err {
            WsTransportError::ChannelsNotAttached => SyncError::channel_error(err.to_string()),
            WsTransportError::AuthRejected { .. } => SyncError::connection_failed(err.to_string()),
            err if err.is_permanent() => SyncError::config_error(err.to_string()),
            err => SyncError::connection_failed(err.to_string()),
        }
    }
}
