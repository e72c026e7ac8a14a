//! Optimistic updates
//!
//! An optimistic update is a pure function over a view of the currently subscribed
//! query results. The engine replays every pending update, in submission order, on
//! top of the authoritative results whenever either side changes.

use crate::value::{Args, Value};
use std::sync::Arc;

/// Read/write view of loaded query results handed to optimistic updates
pub trait OptimisticView {
    /// Current value of a subscribed, loaded query
    fn get_query(&self, name: &str, args: &Args) -> Option<&Value>;

    /// Replace the visible value of a subscribed query
    ///
    /// Returns `false` and changes nothing when no such subscription exists.
    fn set_query(&mut self, name: &str, args: &Args, value: Value) -> bool;
}

/// Shared optimistic update function
///
/// Must be deterministic: it may run many times against different bases.
pub type OptimisticUpdate = Arc<dyn Fn(&mut dyn OptimisticView) + Send + Sync>;
