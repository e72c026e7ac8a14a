//! LiveSync WebSocket transport
//!
//! [`WebSocketTransport`] implements [`TransportTask`](livesync_core::TransportTask)
//! over `tokio-tungstenite`: one JSON text message per frame, bearer credentials in
//! the handshake, and reconnection with the configured backoff.

pub mod config;
pub mod error;
pub mod transport;

pub use config::WsTransportConfig;
pub use error::WsTransportError;
pub use transport::{build_request, WebSocketTransport};
