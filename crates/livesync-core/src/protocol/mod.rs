//! Protocol state machines

pub mod connection_state;

pub use connection_state::{
    AuditEntry, ClosedState, ConnectedState, ConnectingState, ConnectionEvent, ConnectionState,
    ConnectionStatus, DisconnectedState, ReconnectingState, StateAction, StateTransition,
    StateTransitionError,
};
