//! Sync engine logic
//!
//! - `state`: everything the engine owns
//! - `handlers`: command, event and timer handlers
//! - `task`: the `SyncEngineTask` loop
//!
//! All subscription, mutation and connection state is owned by one task and changed
//! only from its loop, so listener callbacks and reply completions happen in a single
//! well-defined order. Client handles talk to it exclusively through channels.

pub mod handlers;
pub mod state;
pub mod task;

pub use handlers::{CommandHandlers, EventHandlers};
pub use state::{EngineState, Outputs, MAX_AUDIT_ENTRIES};
pub use task::SyncEngineTask;
