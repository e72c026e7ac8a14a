//! LiveSync Harness
//!
//! An in-memory [`MockTransport`] and the [`MockServer`] controller that plays the
//! backend's side of it. Tests drive the engine through its public client while the
//! controller inspects outgoing frames and scripts the backend's replies.

pub mod mock_transport;

pub use mock_transport::{MockServer, MockTransport, MockTransportConfig, FRAME_TIMEOUT};
