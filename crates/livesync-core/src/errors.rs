//! Error types for the LiveSync client
//!
//! [`SyncError`] is the single error type surfaced by every public operation of the
//! engine. Transport crates define their own error enums and convert into it.

use crate::protocol::StateTransitionError;
use crate::types::CorrelationId;
use std::time::Duration;

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Errors reported by the sync engine and its client handle
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("Connection error: {reason}")]
    Connection { reason: String },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Invalid mutation: {reason}")]
    InvalidMutation { reason: String },

    #[error("Outbound buffer full (capacity: {capacity}), request dropped")]
    Backpressure { capacity: usize },

    #[error("Mutation rejected by backend: {reason}")]
    MutationRejected { reason: String },

    #[error("Mutation {correlation_id} timed out after {after:?}")]
    MutationTimeout {
        correlation_id: CorrelationId,
        after: Duration,
    },

    #[error("Sync engine is closed")]
    Closed,

    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Codec error: {reason}")]
    Codec { reason: String },

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Codec {
            reason: err.to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Convenience Constructors
// ----------------------------------------------------------------------------

impl SyncError {
    /// Create a connection error
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Create an invalid query error
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Create an invalid mutation error
    pub fn invalid_mutation(reason: impl Into<String>) -> Self {
        Self::InvalidMutation {
            reason: reason.into(),
        }
    }

    /// Create a rejection error from a backend failure acknowledgement
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::MutationRejected {
            reason: reason.into(),
        }
    }

    /// Create a channel error
    pub fn channel_error(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a codec error
    pub fn codec_error(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Connection { .. }
                | SyncError::Backpressure { .. }
                | SyncError::MutationTimeout { .. }
        )
    }

    /// Whether the error was caused by the caller's input rather than the environment
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidQuery { .. } | SyncError::InvalidMutation { .. }
        )
    }
}

/// Result type alias for LiveSync operations
pub type SyncResult<T> = Result<T, SyncError>;
