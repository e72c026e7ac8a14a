//! Engine state
//!
//! Everything the engine task owns: connection state machine, registry, dispatcher,
//! outbound buffer and bookkeeping. Nothing outside the task holds a reference.

use crate::managers::{MutationDispatcher, SubscriptionRegistry};
use livesync_core::channel::Reply;
use livesync_core::{
    AppEvent, AuditEntry, ConnectionState, Effect, Endpoint, EngineStats, EngineStatus,
    OutboundBuffer, SyncConfig,
};
use std::collections::VecDeque;
use tokio::time::Instant;

/// Number of state transitions kept for diagnostics
pub const MAX_AUDIT_ENTRIES: usize = 1000;

/// Effects and app events produced while handling one input
#[derive(Debug, Default)]
pub struct Outputs {
    pub effects: Vec<Effect>,
    pub app_events: Vec<AppEvent>,
}

impl Outputs {
    pub fn effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn app_event(&mut self, event: AppEvent) {
        self.app_events.push(event);
    }
}

/// State owned by the engine task
pub struct EngineState {
    pub endpoint: Endpoint,
    pub connection: ConnectionState,
    pub registry: SubscriptionRegistry,
    pub dispatcher: MutationDispatcher,
    pub outbound: OutboundBuffer,
    /// `connect()` callers waiting for the link
    pub connect_waiters: Vec<Reply<()>>,
    pub audit_trail: VecDeque<AuditEntry>,
    pub stats: EngineStats,
}

impl EngineState {
    pub fn new(endpoint: Endpoint, config: &SyncConfig) -> Self {
        Self {
            endpoint,
            connection: ConnectionState::new_disconnected(),
            registry: SubscriptionRegistry::new(config.registry.clone()),
            dispatcher: MutationDispatcher::new(
                config.mutations.clone(),
                config.registry.max_arg_depth,
            ),
            outbound: OutboundBuffer::new(config.outbound.buffer_capacity),
            connect_waiters: Vec::new(),
            audit_trail: VecDeque::new(),
            stats: EngineStats::default(),
        }
    }

    pub fn record_audit(&mut self, entry: AuditEntry) {
        if self.audit_trail.len() >= MAX_AUDIT_ENTRIES {
            self.audit_trail.pop_front();
        }
        self.audit_trail.push_back(entry);
    }

    /// Earliest timer the engine has to wake up for
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.registry.next_eviction(), self.dispatcher.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            connection: self.connection.status(),
            last_error: self.connection.last_error().map(String::from),
            subscriptions: self.registry.len(),
            listeners: self.registry.listener_count(),
            pending_mutations: self.dispatcher.pending_count(),
            buffered_frames: self.outbound.len(),
            stats: self.stats.clone(),
        }
    }
}
