//! CSP Channel Communication Types
//!
//! Message types exchanged between the tasks of a sync engine:
//!
//! - [`Command`]: client handle → engine, each carrying a oneshot reply
//! - [`Event`]: transport → engine
//! - [`Effect`]: engine → transport
//! - [`AppEvent`]: engine → observers

use crate::errors::{SyncError, SyncResult};
use crate::frame::{ClientFrame, ServerFrame};
use crate::listener::QueryListener;
use crate::optimistic::OptimisticUpdate;
use crate::protocol::ConnectionStatus;
use crate::types::{CorrelationId, Endpoint, SubscriptionHandle};
use crate::value::{Args, Value};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

/// Reply channel attached to a command
pub type Reply<T> = oneshot::Sender<SyncResult<T>>;

// ----------------------------------------------------------------------------
// Commands (Client → Engine)
// ----------------------------------------------------------------------------

pub enum Command {
    Connect {
        reply: Reply<()>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Subscribe {
        name: String,
        args: Args,
        listener: Box<dyn QueryListener>,
        reply: Reply<SubscriptionHandle>,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
        reply: Reply<()>,
    },
    Mutate {
        name: String,
        args: Args,
        optimistic: Option<OptimisticUpdate>,
        reply: Reply<Value>,
    },
    GetStatus {
        reply: Reply<EngineStatus>,
    },
    Close {
        reply: Reply<()>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect { .. } => "Connect",
            Command::Disconnect { .. } => "Disconnect",
            Command::Subscribe { .. } => "Subscribe",
            Command::Unsubscribe { .. } => "Unsubscribe",
            Command::Mutate { .. } => "Mutate",
            Command::GetStatus { .. } => "GetStatus",
            Command::Close { .. } => "Close",
        }
    }

    /// Answer the command with an error without processing it
    pub fn reject(self, error: SyncError) {
        // A dropped receiver only means the caller stopped waiting.
        match self {
            Command::Connect { reply }
            | Command::Disconnect { reply }
            | Command::Unsubscribe { reply, .. }
            | Command::Close { reply } => {
                let _ = reply.send(Err(error));
            }
            Command::Subscribe { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::Mutate { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::GetStatus { reply } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Subscribe { name, args, .. } => f
                .debug_struct("Subscribe")
                .field("name", name)
                .field("args", args)
                .finish_non_exhaustive(),
            Command::Unsubscribe { handle, .. } => f
                .debug_struct("Unsubscribe")
                .field("handle", handle)
                .finish_non_exhaustive(),
            Command::Mutate {
                name,
                args,
                optimistic,
                ..
            } => f
                .debug_struct("Mutate")
                .field("name", name)
                .field("args", args)
                .field("optimistic", &optimistic.is_some())
                .finish_non_exhaustive(),
            other => f.write_str(other.name()),
        }
    }
}

// ----------------------------------------------------------------------------
// Events (Transport → Engine)
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The link is up and frames may be written
    Connected,
    /// One connection attempt failed; the transport will retry after `retry_in`
    ConnectAttemptFailed {
        attempt: u32,
        reason: String,
        retry_in: Duration,
    },
    /// The transport gave up after its retry budget
    ConnectFailed { reason: String },
    /// An established link dropped; the transport is reconnecting
    LinkLost { reason: String },
    /// The link was closed in response to [`Effect::Close`]
    Disconnected,
    FrameReceived(ServerFrame),
    /// An inbound message could not be decoded and was dropped
    MalformedFrame { reason: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Connected => "Connected",
            Event::ConnectAttemptFailed { .. } => "ConnectAttemptFailed",
            Event::ConnectFailed { .. } => "ConnectFailed",
            Event::LinkLost { .. } => "LinkLost",
            Event::Disconnected => "Disconnected",
            Event::FrameReceived(_) => "FrameReceived",
            Event::MalformedFrame { .. } => "MalformedFrame",
        }
    }
}

// ----------------------------------------------------------------------------
// Effects (Engine → Transport)
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open the link, retrying with backoff
    Open { endpoint: Endpoint },
    /// Write a frame to the established link
    Send(ClientFrame),
    /// Drop the current link and reconnect
    Recycle { reason: String },
    /// Close the link and stay closed until the next `Open`
    Close,
    /// Stop the transport task
    Shutdown,
}

// ----------------------------------------------------------------------------
// App Events (Engine → Observers)
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    ConnectionChanged {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
    /// A connection attempt failed and will be retried
    ConnectionRetry { attempt: u32, retry_in: Duration },
    /// Subscriptions and mutations were replayed on a fresh link
    Resynced {
        subscriptions: usize,
        mutations: usize,
    },
    MutationSettled {
        correlation_id: CorrelationId,
        success: bool,
    },
    /// A buffered request was dropped because the outbound buffer was full
    RequestDropped { kind: &'static str },
}

// ----------------------------------------------------------------------------
// Status snapshot
// ----------------------------------------------------------------------------

/// Counters maintained by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub commands_processed: u64,
    pub events_processed: u64,
    pub frames_sent: u64,
    pub frames_buffered: u64,
    pub frames_received: u64,
    pub frames_malformed: u64,
    pub deliveries_discarded: u64,
    pub resyncs: u64,
    pub mutations_committed: u64,
    pub mutations_rejected: u64,
    pub mutations_timed_out: u64,
    pub backpressure_drops: u64,
}

/// Snapshot returned by the status command
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub connection: ConnectionStatus,
    /// Reason for the last drop to `Disconnected`, while disconnected
    pub last_error: Option<String>,
    pub subscriptions: usize,
    pub listeners: usize,
    pub pending_mutations: usize,
    pub buffered_frames: usize,
    pub stats: EngineStats,
}
