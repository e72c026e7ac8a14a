//! LiveSync Core
//!
//! Shared building blocks for the LiveSync reactive synchronization client:
//!
//! - [`Value`] model and canonical [`QueryKey`]s
//! - Client/server wire [`frame`]s and their JSON codec
//! - CSP channel message types ([`Command`], [`Event`], [`Effect`], [`AppEvent`])
//! - The consuming [`ConnectionState`] machine
//! - The [`TransportTask`] trait implemented by concrete transports
//! - Reconnect [`Backoff`] policy and the bounded [`OutboundBuffer`]
//!
//! The engine itself lives in `livesync-runtime`; this crate has no task of its own.

pub mod backoff;
pub mod channel;
pub mod config;
pub mod errors;
pub mod frame;
pub mod listener;
pub mod optimistic;
pub mod outbound;
pub mod protocol;
pub mod transport_task;
pub mod types;
pub mod value;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use backoff::Backoff;
pub use channel::{
    create_app_event_channel, create_command_channel, create_effect_channel,
    create_event_channel, AppEvent, AppEventReceiver, AppEventSender, Command, CommandReceiver,
    CommandSender, Effect, EffectReceiver, EffectSender, EngineStats, EngineStatus, Event,
    EventReceiver, EventSender,
};
pub use config::{
    BackoffConfig, ChannelConfig, MutationConfig, OutboundConfig, RegistryConfig, SyncConfig,
};
pub use errors::{SyncError, SyncResult};
pub use frame::{ClientFrame, ConnectionEventKind, ServerFrame};
pub use listener::{QueryListener, QueryState, QueryUpdate};
pub use optimistic::{OptimisticUpdate, OptimisticView};
pub use outbound::{BufferedFrame, FrameOrigin, OutboundBuffer};
pub use protocol::{
    AuditEntry, ConnectionEvent, ConnectionState, ConnectionStatus, StateAction,
    StateTransition, StateTransitionError,
};
pub use transport_task::TransportTask;
pub use types::{
    CorrelationId, Endpoint, QueryKey, SubscriptionHandle, SubscriptionId, Timestamp, Version,
};
pub use value::{Args, Value};
