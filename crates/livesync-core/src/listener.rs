//! Listener interface for query subscriptions
//!
//! Listeners run inline on the engine task, so implementations must be quick and
//! must not block. Callers that want results on their own task use the
//! channel-backed `LiveQuery` from `livesync-runtime` instead.

use crate::errors::SyncError;
use crate::types::{QueryKey, Version};
use crate::value::Value;

/// Locally visible state of a query result
#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryState {
    /// No result received yet
    #[default]
    Loading,
    Loaded(Value),
    /// The backend failed to execute the query
    Failed(String),
}

impl QueryState {
    pub fn value(&self) -> Option<&Value> {
        match self {
            QueryState::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }
}

/// One delivery to a listener
#[derive(Debug, Clone, PartialEq)]
pub struct QueryUpdate {
    pub key: QueryKey,
    pub version: Version,
    pub state: QueryState,
    /// Whether the result may be outdated because the link is down
    pub stale: bool,
}

/// Receiver of query result deliveries
pub trait QueryListener: Send + 'static {
    /// Called with every new visible result, in strictly increasing version order
    fn on_update(&mut self, update: &QueryUpdate);

    /// Called when results become stale (link lost) or fresh again
    fn on_stale(&mut self, _stale: bool) {}

    /// Called when the subscription is torn down by the engine
    fn on_error(&mut self, error: &SyncError) {
        tracing::warn!("Subscription listener dropped: {}", error);
    }

    /// Whether nobody reads this listener's output any more
    ///
    /// Closed listeners are removed by the engine as if they had unsubscribed.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> QueryListener for F
where
    F: FnMut(&QueryUpdate) + Send + 'static,
{
    fn on_update(&mut self, update: &QueryUpdate) {
        self(update)
    }
}
