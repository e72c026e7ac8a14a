//! Wire frames exchanged with the backend
//!
//! Frames are JSON text messages, internally tagged by `"type"`, with camelCase
//! field names:
//!
//! ```json
//! {"type":"Subscribe","id":1,"name":"listMessages","args":{}}
//! {"type":"QueryResult","id":1,"version":4,"value":[]}
//! ```

use crate::errors::SyncResult;
use crate::types::{CorrelationId, SubscriptionId};
use crate::value::{Args, Value};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Client → Server
// ----------------------------------------------------------------------------

/// Frames sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Subscribe {
        id: SubscriptionId,
        name: String,
        args: Args,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribe { id: SubscriptionId },
    #[serde(rename_all = "camelCase")]
    Mutate {
        correlation_id: CorrelationId,
        name: String,
        args: Args,
    },
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Subscribe { .. } => "Subscribe",
            ClientFrame::Unsubscribe { .. } => "Unsubscribe",
            ClientFrame::Mutate { .. } => "Mutate",
        }
    }

    pub fn encode(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ----------------------------------------------------------------------------
// Server → Client
// ----------------------------------------------------------------------------

/// Connection-level notices pushed by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEventKind {
    /// Keepalive, no action required
    Ping,
    /// The server is about to drop the link; reconnect
    GoingAway,
    /// Credentials were refused; stop reconnecting
    AuthRejected,
}

/// Frames sent by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    QueryResult {
        id: SubscriptionId,
        version: u64,
        value: Value,
    },
    #[serde(rename_all = "camelCase")]
    QueryFailed {
        id: SubscriptionId,
        version: u64,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    MutationAck {
        correlation_id: CorrelationId,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ConnectionEvent {
        kind: ConnectionEventKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ServerFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::QueryResult { .. } => "QueryResult",
            ServerFrame::QueryFailed { .. } => "QueryFailed",
            ServerFrame::MutationAck { .. } => "MutationAck",
            ServerFrame::ConnectionEvent { .. } => "ConnectionEvent",
        }
    }

    /// Successful acknowledgement carrying the mutation's return value
    pub fn ack(correlation_id: CorrelationId, value: Value) -> Self {
        ServerFrame::MutationAck {
            correlation_id,
            success: true,
            value: Some(value),
            error: None,
        }
    }

    /// Failed acknowledgement carrying the backend's error message
    pub fn nack(correlation_id: CorrelationId, error: impl Into<String>) -> Self {
        ServerFrame::MutationAck {
            correlation_id,
            success: false,
            value: None,
            error: Some(error.into()),
        }
    }

    pub fn encode(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Collapse the `success` / `value` / `error` fields of an acknowledgement
pub fn ack_outcome(success: bool, value: Option<Value>, error: Option<String>) -> Result<Value, String> {
    if success {
        Ok(value.unwrap_or(Value::Null))
    } else {
        Err(error.unwrap_or_else(|| "mutation failed without an error message".to_string()))
    }
}
