//! LiveSync Runtime
//!
//! The sync engine: a single task that owns the subscription registry, the mutation
//! dispatcher and the connection state machine, driven by client commands, transport
//! events and its own timers.
//!
//! ```ignore
//! let mut engine = SyncEngineBuilder::new(Endpoint::new("wss://example.test/sync"))
//!     .with_transport(WebSocketTransport::new(WsTransportConfig::default()))
//!     .start()?;
//! let client = engine.client();
//! client.connect().await?;
//! let mut messages = client.watch("listMessages", args! {}).await?;
//! let snapshot = messages.wait_for(|s| !s.state.is_loading()).await?;
//! ```

pub mod builder;
pub mod client;
pub mod listener;
pub mod logic;
pub mod managers;

pub use builder::{SyncEngine, SyncEngineBuilder};
pub use client::SyncClient;
pub use listener::{LiveQuery, QuerySnapshot};
pub use managers::*;

// Re-export core types for convenience
pub use livesync_core::{
    args, AppEvent, Args, ConnectionStatus, CorrelationId, Endpoint, EngineStats, EngineStatus,
    OptimisticView, QueryListener, QueryState, QueryUpdate, SubscriptionHandle, SyncConfig,
    SyncError, SyncResult, Value, Version,
};
