//! Linear Connection State Machine
//!
//! The engine owns exactly one [`ConnectionState`]. A transition consumes the current
//! state and yields the next state, the [`StateAction`]s the engine must perform and
//! an [`AuditEntry`]. Invalid event/state combinations are rejected with an error
//! instead of silently changing state.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

// ----------------------------------------------------------------------------
// Connection State Types
// ----------------------------------------------------------------------------

/// Linear connection state that must be consumed to transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link and no attempt in progress
    Disconnected(DisconnectedState),
    /// First connect cycle after `connect()`
    Connecting(ConnectingState),
    /// Link established and resynchronized
    Connected(ConnectedState),
    /// Link dropped; transport is retrying
    Reconnecting(ReconnectingState),
    /// Terminal state after `close()`
    Closed(ClosedState),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectedState {
    pub last_connected: Option<Timestamp>,
    pub failed_attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectingState {
    pub started: Timestamp,
    pub failed_attempts: u32,
    pub last_connected: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedState {
    pub connected_since: Timestamp,
    pub last_activity: Timestamp,
    pub frames_received: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectingState {
    pub since: Timestamp,
    pub failed_attempts: u32,
    pub reason: String,
    pub last_connected: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedState {
    pub closed_at: Timestamp,
}

/// Coarse connection status exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Reconnecting => "Reconnecting",
            ConnectionStatus::Closed => "Closed",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// State Transition Events
// ----------------------------------------------------------------------------

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Caller asked to connect
    Connect,
    /// Transport reported a failed attempt and will retry
    AttemptFailed { attempt: u32, reason: String },
    /// Transport established the link
    LinkEstablished,
    /// Transport gave up after its retry budget
    RetriesExhausted { reason: String },
    /// An established link dropped
    LinkLost { reason: String },
    /// A frame arrived on the established link
    FrameActivity,
    /// Caller (or the backend via `AuthRejected`) asked to disconnect
    Disconnect { reason: Option<String> },
    /// Caller closed the engine
    Close,
}

impl ConnectionEvent {
    fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connect => "Connect",
            ConnectionEvent::AttemptFailed { .. } => "AttemptFailed",
            ConnectionEvent::LinkEstablished => "LinkEstablished",
            ConnectionEvent::RetriesExhausted { .. } => "RetriesExhausted",
            ConnectionEvent::LinkLost { .. } => "LinkLost",
            ConnectionEvent::FrameActivity => "FrameActivity",
            ConnectionEvent::Disconnect { .. } => "Disconnect",
            ConnectionEvent::Close => "Close",
        }
    }
}

// ----------------------------------------------------------------------------
// State Transition Results
// ----------------------------------------------------------------------------

/// Work the engine performs as a consequence of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateAction {
    /// Ask the transport to open the link
    OpenLink,
    /// Ask the transport to close the link without reconnecting
    CloseLink,
    /// Replay live subscriptions and unacknowledged mutations
    Resync,
    /// Tag every subscription as stale
    MarkStale,
    /// Complete pending `connect()` calls successfully
    ResolveConnectWaiters,
    /// Fail pending `connect()` calls
    FailConnectWaiters { reason: String },
    /// Stop the transport task
    ShutdownTransport,
}

/// Result of a state transition
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub new_state: ConnectionState,
    pub actions: Vec<StateAction>,
    pub audit_entry: AuditEntry,
}

/// Audit trail entry for state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
    pub actions_count: usize,
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl ConnectionState {
    /// Initial state of a fresh engine
    pub fn new_disconnected() -> Self {
        ConnectionState::Disconnected(DisconnectedState {
            last_connected: None,
            failed_attempts: 0,
            last_error: None,
        })
    }

    /// Get current state name for logging/audit
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Connecting(_) => "Connecting",
            ConnectionState::Connected(_) => "Connected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
            ConnectionState::Closed(_) => "Closed",
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match self {
            ConnectionState::Disconnected(_) => ConnectionStatus::Disconnected,
            ConnectionState::Connecting(_) => ConnectionStatus::Connecting,
            ConnectionState::Connected(_) => ConnectionStatus::Connected,
            ConnectionState::Reconnecting(_) => ConnectionStatus::Reconnecting,
            ConnectionState::Closed(_) => ConnectionStatus::Closed,
        }
    }

    /// Frames may be written to the link only in this state
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed(_))
    }

    /// Why the engine last fell back to `Disconnected`, while it stays there
    pub fn last_error(&self) -> Option<&str> {
        match self {
            ConnectionState::Disconnected(state) => state.last_error.as_deref(),
            _ => None,
        }
    }

    /// Process an event and transition to new state (consumes self)
    pub fn transition(
        self,
        event: ConnectionEvent,
    ) -> Result<StateTransition, StateTransitionError> {
        let from_state = self.state_name();
        let event_name = event.name();
        let now = Timestamp::now();

        let (new_state, actions) = match (self, event) {
            // Terminal
            (ConnectionState::Closed(_), _) => {
                return Err(StateTransitionError::AlreadyClosed {
                    event: event_name.to_string(),
                });
            }
            (_, ConnectionEvent::Close) => (
                ConnectionState::Closed(ClosedState { closed_at: now }),
                vec![StateAction::ShutdownTransport],
            ),

            // Connect requests
            (ConnectionState::Disconnected(state), ConnectionEvent::Connect) => (
                ConnectionState::Connecting(ConnectingState {
                    started: now,
                    failed_attempts: 0,
                    last_connected: state.last_connected,
                }),
                vec![StateAction::OpenLink],
            ),
            (ConnectionState::Connected(state), ConnectionEvent::Connect) => (
                ConnectionState::Connected(state),
                vec![StateAction::ResolveConnectWaiters],
            ),
            (state @ ConnectionState::Connecting(_), ConnectionEvent::Connect)
            | (state @ ConnectionState::Reconnecting(_), ConnectionEvent::Connect) => {
                (state, Vec::new())
            }

            // Attempt bookkeeping
            (
                ConnectionState::Connecting(mut state),
                ConnectionEvent::AttemptFailed { attempt, .. },
            ) => {
                state.failed_attempts = attempt;
                (ConnectionState::Connecting(state), Vec::new())
            }
            (
                ConnectionState::Reconnecting(mut state),
                ConnectionEvent::AttemptFailed { attempt, .. },
            ) => {
                state.failed_attempts = attempt;
                (ConnectionState::Reconnecting(state), Vec::new())
            }

            // Link established
            (ConnectionState::Connecting(_), ConnectionEvent::LinkEstablished)
            | (ConnectionState::Reconnecting(_), ConnectionEvent::LinkEstablished) => (
                ConnectionState::Connected(ConnectedState {
                    connected_since: now,
                    last_activity: now,
                    frames_received: 0,
                }),
                vec![StateAction::Resync, StateAction::ResolveConnectWaiters],
            ),

            // Retry budget exhausted
            (
                ConnectionState::Connecting(state),
                ConnectionEvent::RetriesExhausted { reason },
            ) => (
                ConnectionState::Disconnected(DisconnectedState {
                    last_connected: state.last_connected,
                    failed_attempts: state.failed_attempts,
                    last_error: Some(reason.clone()),
                }),
                vec![StateAction::FailConnectWaiters { reason }],
            ),
            (
                ConnectionState::Reconnecting(state),
                ConnectionEvent::RetriesExhausted { reason },
            ) => (
                ConnectionState::Disconnected(DisconnectedState {
                    last_connected: Some(state.last_connected),
                    failed_attempts: state.failed_attempts,
                    last_error: Some(reason.clone()),
                }),
                vec![StateAction::FailConnectWaiters { reason }],
            ),

            // Established link activity
            (ConnectionState::Connected(mut state), ConnectionEvent::FrameActivity) => {
                state.last_activity = now;
                state.frames_received += 1;
                (ConnectionState::Connected(state), Vec::new())
            }
            (ConnectionState::Connected(_), ConnectionEvent::LinkLost { reason }) => (
                ConnectionState::Reconnecting(ReconnectingState {
                    since: now,
                    failed_attempts: 0,
                    reason,
                    last_connected: now,
                }),
                vec![StateAction::MarkStale],
            ),

            // Explicit disconnect
            (ConnectionState::Disconnected(state), ConnectionEvent::Disconnect { .. }) => {
                (ConnectionState::Disconnected(state), Vec::new())
            }
            (state, ConnectionEvent::Disconnect { reason }) => {
                let last_connected = match &state {
                    ConnectionState::Connected(_) => Some(now),
                    ConnectionState::Reconnecting(s) => Some(s.last_connected),
                    ConnectionState::Connecting(s) => s.last_connected,
                    _ => None,
                };
                let reason = reason.unwrap_or_else(|| "disconnect requested".to_string());
                (
                    ConnectionState::Disconnected(DisconnectedState {
                        last_connected,
                        failed_attempts: 0,
                        last_error: Some(reason.clone()),
                    }),
                    vec![
                        StateAction::CloseLink,
                        StateAction::MarkStale,
                        StateAction::FailConnectWaiters { reason },
                    ],
                )
            }

            // Invalid transitions
            (state, event) => {
                return Err(StateTransitionError::InvalidTransition {
                    from_state: state.state_name().to_string(),
                    event: event.name().to_string(),
                });
            }
        };

        let audit_entry = AuditEntry {
            timestamp: now,
            from_state: from_state.to_string(),
            to_state: new_state.state_name().to_string(),
            event: event_name.to_string(),
            actions_count: actions.len(),
        };

        Ok(StateTransition {
            new_state,
            actions,
            audit_entry,
        })
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateTransitionError {
    #[error("Invalid transition from {from_state} on event {event}")]
    InvalidTransition { from_state: String, event: String },
    #[error("Connection is closed; cannot handle {event}")]
    AlreadyClosed { event: String },
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
