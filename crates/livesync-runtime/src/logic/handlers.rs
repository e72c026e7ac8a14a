//! Command, event and timer handlers for the engine task
//!
//! Handlers mutate [`EngineState`] and collect the effects and app events to emit in
//! [`Outputs`]; the task loop dispatches them afterwards. Every handler runs to
//! completion before the next input is looked at.

use super::state::{EngineState, Outputs};
use livesync_core::channel::Reply;
use livesync_core::frame::ack_outcome;
use livesync_core::{
    AppEvent, Args, ClientFrame, ConnectionEvent, ConnectionEventKind, CorrelationId, Effect,
    EngineStatus, FrameOrigin, OptimisticUpdate, QueryListener, QueryState, ServerFrame,
    StateAction, SubscriptionHandle, SubscriptionId, SyncError, SyncResult, Value,
};
use crate::managers::{AckOutcome, Delivery};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

// ----------------------------------------------------------------------------
// Shared helpers
// ----------------------------------------------------------------------------

/// Run a connection state transition and perform its actions
fn apply_connection_event(
    state: &mut EngineState,
    event: ConnectionEvent,
    out: &mut Outputs,
) -> SyncResult<()> {
    let from = state.connection.status();
    let transition = state.connection.clone().transition(event)?;
    let to = transition.new_state.status();

    debug!(
        from = %transition.audit_entry.from_state,
        to = %transition.audit_entry.to_state,
        event = %transition.audit_entry.event,
        "Connection state transition"
    );
    state.record_audit(transition.audit_entry);
    state.connection = transition.new_state;

    if from != to {
        info!(%from, %to, "Connection status changed");
        out.app_event(AppEvent::ConnectionChanged { from, to });
    }

    for action in transition.actions {
        run_action(state, action, out);
    }
    Ok(())
}

fn run_action(state: &mut EngineState, action: StateAction, out: &mut Outputs) {
    match action {
        StateAction::OpenLink => out.effect(Effect::Open {
            endpoint: state.endpoint.clone(),
        }),
        StateAction::CloseLink => out.effect(Effect::Close),
        StateAction::ShutdownTransport => out.effect(Effect::Shutdown),
        StateAction::Resync => resync(state, out),
        StateAction::MarkStale => {
            let marked = state.registry.mark_stale();
            debug!(subscriptions = marked, "Results marked stale");
        }
        StateAction::ResolveConnectWaiters => {
            for waiter in state.connect_waiters.drain(..) {
                let _ = waiter.send(Ok(()));
            }
        }
        StateAction::FailConnectWaiters { reason } => {
            for waiter in state.connect_waiters.drain(..) {
                let _ = waiter.send(Err(SyncError::connection_failed(reason.clone())));
            }
        }
    }
}

/// Replay every live subscription, then every unacknowledged mutation
///
/// Anything still in the outbound buffer is part of this set, so the buffer is
/// discarded rather than flushed.
fn resync(state: &mut EngineState, out: &mut Outputs) {
    let discarded = state.outbound.clear().len();
    let subscriptions = state.registry.resync_frames();
    let mutations = state.dispatcher.resync_frames();

    for (_, frame) in &subscriptions {
        out.effect(Effect::Send(frame.clone()));
    }
    for (correlation_id, frame) in &mutations {
        out.effect(Effect::Send(frame.clone()));
        state.dispatcher.mark_sent(correlation_id);
    }

    state.stats.frames_sent += (subscriptions.len() + mutations.len()) as u64;
    state.stats.resyncs += 1;
    info!(
        subscriptions = subscriptions.len(),
        mutations = mutations.len(),
        buffered_discarded = discarded,
        "Resynchronized with backend"
    );
    out.app_event(AppEvent::Resynced {
        subscriptions: subscriptions.len(),
        mutations: mutations.len(),
    });
}

/// Send a frame now, or buffer it until the next resync
fn emit_frame(state: &mut EngineState, frame: ClientFrame, origin: FrameOrigin, out: &mut Outputs) {
    if state.connection.is_connected() {
        trace!(kind = frame.kind(), "Sending frame");
        out.effect(Effect::Send(frame));
        state.stats.frames_sent += 1;
        return;
    }

    state.stats.frames_buffered += 1;
    if let Some(evicted) = state.outbound.push(frame, origin) {
        drop_for_backpressure(state, evicted.frame.kind(), evicted.origin, out);
    }
}

/// Fail the call behind a frame that was pushed out of the full buffer
fn drop_for_backpressure(
    state: &mut EngineState,
    kind: &'static str,
    origin: FrameOrigin,
    out: &mut Outputs,
) {
    let error = SyncError::Backpressure {
        capacity: state.outbound.capacity(),
    };
    state.stats.backpressure_drops += 1;
    warn!(kind, ?origin, "Outbound buffer full, dropping oldest request");

    match origin {
        FrameOrigin::Subscription(id) => {
            if let Some(key) = state.registry.get(id).map(|sub| sub.key().clone()) {
                state.registry.fail_subscription(id, &error);
                state.dispatcher.retire_layers_touching(&key);
            }
        }
        FrameOrigin::Mutation(correlation_id) => {
            if let Some(had_layer) = state.dispatcher.fail(&correlation_id, error) {
                if had_layer {
                    recompute_views(state, None);
                }
            }
        }
    }
    out.app_event(AppEvent::RequestDropped { kind });
}

/// Replay optimistic layers over the authoritative results
fn recompute_views(state: &mut EngineState, delivered: Option<SubscriptionId>) {
    let layers = state.dispatcher.optimistic_layers();
    let report = state.registry.recompute(&layers, delivered);
    let retired = state.dispatcher.record_touched(report.touched);
    trace!(
        layers = layers.len(),
        notified = report.notified,
        retired,
        "Views recomputed"
    );
}

// ----------------------------------------------------------------------------
// Command Handlers
// ----------------------------------------------------------------------------

/// Handlers for commands sent by client handles
pub struct CommandHandlers;

impl CommandHandlers {
    pub fn handle_connect(state: &mut EngineState, reply: Reply<()>) -> SyncResult<Outputs> {
        let mut out = Outputs::default();
        state.connect_waiters.push(reply);
        apply_connection_event(state, ConnectionEvent::Connect, &mut out)?;
        Ok(out)
    }

    pub fn handle_disconnect(state: &mut EngineState, reply: Reply<()>) -> SyncResult<Outputs> {
        let mut out = Outputs::default();
        let result = apply_connection_event(state, ConnectionEvent::Disconnect { reason: None }, &mut out);
        let _ = reply.send(result.clone());
        result.map(|_| out)
    }

    pub fn handle_subscribe(
        state: &mut EngineState,
        name: String,
        args: Args,
        listener: Box<dyn QueryListener>,
        reply: Reply<SubscriptionHandle>,
    ) -> SyncResult<Outputs> {
        let mut out = Outputs::default();
        let stale = !state.connection.is_connected();

        let outcome = match state.registry.subscribe(name, args, listener, stale) {
            Ok(outcome) => outcome,
            Err(error) => {
                debug!(%error, "Subscribe rejected");
                let _ = reply.send(Err(error));
                return Ok(out);
            }
        };

        if outcome.created {
            if let Some(frame) = state
                .registry
                .get(outcome.subscription)
                .map(|sub| sub.subscribe_frame())
            {
                emit_frame(
                    state,
                    frame,
                    FrameOrigin::Subscription(outcome.subscription),
                    &mut out,
                );
            }
        }

        let _ = reply.send(Ok(outcome.handle));
        Ok(out)
    }

    pub fn handle_unsubscribe(
        state: &mut EngineState,
        handle: SubscriptionHandle,
        reply: Reply<()>,
    ) -> SyncResult<Outputs> {
        if !state.registry.unsubscribe(handle, Instant::now()) {
            debug!(%handle, "Unsubscribe for unknown handle ignored");
        }
        let _ = reply.send(Ok(()));
        Ok(Outputs::default())
    }

    pub fn handle_mutate(
        state: &mut EngineState,
        name: String,
        args: Args,
        optimistic: Option<OptimisticUpdate>,
        reply: Reply<Value>,
    ) -> SyncResult<Outputs> {
        let mut out = Outputs::default();
        if let Err(error) = state.dispatcher.validate(&name, &args) {
            debug!(%error, "Mutation rejected locally");
            let _ = reply.send(Err(error));
            return Ok(out);
        }

        let has_layer = optimistic.is_some();
        let correlation_id = state
            .dispatcher
            .submit(name, args, optimistic, reply, Instant::now());
        if has_layer {
            recompute_views(state, None);
        }

        if let Some(frame) = state.dispatcher.get(&correlation_id).map(|m| m.frame()) {
            state.dispatcher.mark_sent(&correlation_id);
            emit_frame(state, frame, FrameOrigin::Mutation(correlation_id), &mut out);
        }
        debug!(%correlation_id, "Mutation submitted");
        Ok(out)
    }

    pub fn handle_get_status(state: &EngineState, reply: Reply<EngineStatus>) -> SyncResult<Outputs> {
        let _ = reply.send(Ok(state.status()));
        Ok(Outputs::default())
    }

    /// Tear the engine down: everything pending fails with `Closed`
    pub fn handle_close(state: &mut EngineState) -> SyncResult<Outputs> {
        let mut out = Outputs::default();
        apply_connection_event(state, ConnectionEvent::Close, &mut out)?;

        for waiter in state.connect_waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::Closed));
        }
        state.dispatcher.fail_all(&SyncError::Closed);
        state.registry.fail_all(&SyncError::Closed);
        state.outbound.clear();
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// Event Handlers
// ----------------------------------------------------------------------------

/// Handlers for transport events and timers
pub struct EventHandlers;

impl EventHandlers {
    pub fn handle_connected(state: &mut EngineState) -> SyncResult<Outputs> {
        let mut out = Outputs::default();
        apply_connection_event(state, ConnectionEvent::LinkEstablished, &mut out)?;
        Ok(out)
    }

    pub fn handle_attempt_failed(
        state: &mut EngineState,
        attempt: u32,
        reason: String,
        retry_in: std::time::Duration,
    ) -> SyncResult<Outputs> {
        let mut out = Outputs::default();
        warn!(attempt, %reason, retry_in_ms = retry_in.as_millis() as u64, "Connection attempt failed");
        apply_connection_event(state, ConnectionEvent::AttemptFailed { attempt, reason }, &mut out)?;
        out.app_event(AppEvent::ConnectionRetry { attempt, retry_in });
        Ok(out)
    }

    pub fn handle_connect_failed(state: &mut EngineState, reason: String) -> SyncResult<Outputs> {
        let mut out = Outputs::default();
        warn!(%reason, "Giving up on connection");
        apply_connection_event(state, ConnectionEvent::RetriesExhausted { reason }, &mut out)?;
        Ok(out)
    }

    pub fn handle_link_lost(state: &mut EngineState, reason: String) -> SyncResult<Outputs> {
        let mut out = Outputs::default();
        if !state.connection.is_connected() {
            debug!(%reason, state = state.connection.state_name(), "Link loss outside a session ignored");
            return Ok(out);
        }
        warn!(%reason, "Link lost, reconnecting");
        apply_connection_event(state, ConnectionEvent::LinkLost { reason }, &mut out)?;
        Ok(out)
    }

    /// The transport is gone for good; stop expecting a link
    pub fn handle_transport_stopped(state: &mut EngineState) -> SyncResult<Outputs> {
        let mut out = Outputs::default();
        if !state.connection.is_closed() {
            apply_connection_event(
                state,
                ConnectionEvent::Disconnect {
                    reason: Some("transport stopped".to_string()),
                },
                &mut out,
            )?;
        }
        Ok(out)
    }

    pub fn handle_frame(state: &mut EngineState, frame: ServerFrame) -> SyncResult<Outputs> {
        let mut out = Outputs::default();
        if !state.connection.is_connected() {
            debug!(kind = frame.kind(), "Dropping frame received while not connected");
            return Ok(out);
        }
        state.stats.frames_received += 1;
        apply_connection_event(state, ConnectionEvent::FrameActivity, &mut out)?;

        match frame {
            ServerFrame::QueryResult { id, version, value } => {
                Self::deliver(state, id, version, QueryState::Loaded(value));
            }
            ServerFrame::QueryFailed { id, version, error } => {
                warn!(subscription = %id, %error, "Query failed on backend");
                Self::deliver(state, id, version, QueryState::Failed(error));
            }
            ServerFrame::MutationAck {
                correlation_id,
                success,
                value,
                error,
            } => {
                Self::acknowledge(state, correlation_id, ack_outcome(success, value, error), &mut out);
            }
            ServerFrame::ConnectionEvent { kind, reason } => {
                Self::connection_notice(state, kind, reason, &mut out)?;
            }
        }
        Ok(out)
    }

    fn deliver(state: &mut EngineState, id: SubscriptionId, version: u64, result: QueryState) {
        match state.registry.deliver(id, version, result) {
            Delivery::Applied => {
                if let Some(key) = state.registry.get(id).map(|sub| sub.key().clone()) {
                    state.dispatcher.retire_layers_touching(&key);
                }
                recompute_views(state, Some(id));
            }
            Delivery::Refreshed => {
                trace!(subscription = %id, version, "Result confirmed after reconnect");
            }
            Delivery::Discarded => {
                state.stats.deliveries_discarded += 1;
            }
            Delivery::Unknown => {
                warn!(subscription = %id, version, "Result for unknown subscription dropped");
            }
        }
    }

    fn acknowledge(
        state: &mut EngineState,
        correlation_id: CorrelationId,
        outcome: Result<Value, String>,
        out: &mut Outputs,
    ) {
        match state.dispatcher.acknowledge(&correlation_id, outcome) {
            AckOutcome::Unknown => {
                warn!(%correlation_id, "Acknowledgement for unknown mutation dropped");
            }
            AckOutcome::Duplicate => {
                debug!(%correlation_id, "Duplicate acknowledgement ignored");
            }
            AckOutcome::Committed { layer_retained } => {
                state.stats.mutations_committed += 1;
                debug!(%correlation_id, layer_retained, "Mutation committed");
                out.app_event(AppEvent::MutationSettled {
                    correlation_id,
                    success: true,
                });
            }
            AckOutcome::Rejected { had_layer } => {
                state.stats.mutations_rejected += 1;
                info!(%correlation_id, "Mutation rejected by backend");
                if had_layer {
                    recompute_views(state, None);
                }
                out.app_event(AppEvent::MutationSettled {
                    correlation_id,
                    success: false,
                });
            }
        }
    }

    fn connection_notice(
        state: &mut EngineState,
        kind: ConnectionEventKind,
        reason: Option<String>,
        out: &mut Outputs,
    ) -> SyncResult<()> {
        match kind {
            ConnectionEventKind::Ping => {
                trace!("Ping from backend");
                Ok(())
            }
            ConnectionEventKind::GoingAway => {
                let reason = reason.unwrap_or_else(|| "server going away".to_string());
                info!(%reason, "Backend is going away, recycling link");
                apply_connection_event(
                    state,
                    ConnectionEvent::LinkLost {
                        reason: reason.clone(),
                    },
                    out,
                )?;
                out.effect(Effect::Recycle { reason });
                Ok(())
            }
            ConnectionEventKind::AuthRejected => {
                let reason = format!(
                    "authentication rejected: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                warn!(%reason, "Backend rejected credentials");
                apply_connection_event(
                    state,
                    ConnectionEvent::Disconnect {
                        reason: Some(reason),
                    },
                    out,
                )
            }
        }
    }

    pub fn handle_malformed(state: &mut EngineState, reason: String) -> SyncResult<Outputs> {
        state.stats.frames_malformed += 1;
        warn!(%reason, "Malformed frame dropped");
        Ok(Outputs::default())
    }

    /// Run grace-period evictions and mutation deadlines that are due
    pub fn handle_deadlines(state: &mut EngineState, now: Instant) -> SyncResult<Outputs> {
        let mut out = Outputs::default();

        for sub in state.registry.take_due_evictions(now) {
            let origin = FrameOrigin::Subscription(sub.id());
            let never_sent = state.outbound.remove_origin(origin) > 0;
            if state.connection.is_connected() && !never_sent {
                out.effect(Effect::Send(ClientFrame::Unsubscribe { id: sub.id() }));
                state.stats.frames_sent += 1;
            }
            state.dispatcher.retire_layers_touching(sub.key());
            debug!(subscription = %sub.id(), key = %sub.key(), "Subscription evicted");
        }

        let (expired, had_layer) = state.dispatcher.expire(now);
        for correlation_id in expired {
            state.outbound.remove_origin(FrameOrigin::Mutation(correlation_id));
            state.stats.mutations_timed_out += 1;
            warn!(%correlation_id, "Mutation timed out waiting for acknowledgement");
            out.app_event(AppEvent::MutationSettled {
                correlation_id,
                success: false,
            });
        }
        if had_layer {
            recompute_views(state, None);
        }
        Ok(out)
    }
}
