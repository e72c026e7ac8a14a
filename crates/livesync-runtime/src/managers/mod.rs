//! Stateful managers owned by the engine task

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{AckOutcome, DispatcherStats, MutationDispatcher, MutationStatus, PendingMutation};
pub use registry::{
    Delivery, QuerySubscription, RecomputeReport, RegistryStats, SubscribeOutcome,
    SubscriptionRegistry,
};
