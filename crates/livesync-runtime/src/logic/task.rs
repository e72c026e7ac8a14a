//! Sync engine task
//!
//! The single owner of [`EngineState`]. Inputs are handled one at a time: transport
//! events first, then client commands, then timers. Handler outputs are dispatched
//! before the next input is taken.

use super::handlers::{CommandHandlers, EventHandlers};
use super::state::{EngineState, Outputs};
use livesync_core::{
    AppEventSender, Command, CommandReceiver, EffectSender, Endpoint, Event, EventReceiver,
    SyncConfig, SyncError, SyncResult,
};
use std::future::pending;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

pub struct SyncEngineTask {
    state: EngineState,
    command_receiver: CommandReceiver,
    event_receiver: EventReceiver,
    effect_sender: EffectSender,
    app_event_sender: AppEventSender,
    running: bool,
    /// Cleared once every transport sender has been dropped
    events_open: bool,
}

impl SyncEngineTask {
    pub fn new(
        endpoint: Endpoint,
        config: &SyncConfig,
        command_receiver: CommandReceiver,
        event_receiver: EventReceiver,
        effect_sender: EffectSender,
        app_event_sender: AppEventSender,
    ) -> Self {
        Self {
            state: EngineState::new(endpoint, config),
            command_receiver,
            event_receiver,
            effect_sender,
            app_event_sender,
            running: true,
            events_open: true,
        }
    }

    /// Run until closed or until every client handle is gone
    pub async fn run(mut self) -> SyncResult<()> {
        info!(endpoint = %self.state.endpoint, "Sync engine starting");

        while self.running {
            let pruned = self.state.registry.prune_closed(Instant::now());
            if pruned > 0 {
                debug!(pruned, "Dropped listeners with no reader");
            }
            let deadline = self.state.next_deadline();
            tokio::select! {
                biased;

                event = self.event_receiver.recv(), if self.events_open => match event {
                    Some(event) => self.process_event(event),
                    None => {
                        info!("Transport stopped sending events");
                        self.events_open = false;
                        let result = EventHandlers::handle_transport_stopped(&mut self.state);
                        self.finish("transport-stopped", result);
                    }
                },

                command = self.command_receiver.recv() => match command {
                    Some(command) => self.process_command(command),
                    None => {
                        info!("All client handles dropped, shutting down");
                        let result = CommandHandlers::handle_close(&mut self.state);
                        self.finish("close", result);
                        self.running = false;
                    }
                },

                _ = sleep_until_deadline(deadline) => {
                    let result = EventHandlers::handle_deadlines(&mut self.state, Instant::now());
                    self.finish("deadline", result);
                }
            }
        }

        // Anything still queued is answered rather than silently dropped.
        self.command_receiver.close();
        while let Ok(command) = self.command_receiver.try_recv() {
            command.reject(SyncError::Closed);
        }

        info!(
            commands = self.state.stats.commands_processed,
            events = self.state.stats.events_processed,
            "Sync engine stopped"
        );
        Ok(())
    }

    fn process_command(&mut self, command: Command) {
        trace!(command = ?command, "Processing command");
        self.state.stats.commands_processed += 1;
        let name = command.name();

        let result = match command {
            Command::Connect { reply } => CommandHandlers::handle_connect(&mut self.state, reply),
            Command::Disconnect { reply } => {
                CommandHandlers::handle_disconnect(&mut self.state, reply)
            }
            Command::Subscribe {
                name,
                args,
                listener,
                reply,
            } => CommandHandlers::handle_subscribe(&mut self.state, name, args, listener, reply),
            Command::Unsubscribe { handle, reply } => {
                CommandHandlers::handle_unsubscribe(&mut self.state, handle, reply)
            }
            Command::Mutate {
                name,
                args,
                optimistic,
                reply,
            } => CommandHandlers::handle_mutate(&mut self.state, name, args, optimistic, reply),
            Command::GetStatus { reply } => CommandHandlers::handle_get_status(&self.state, reply),
            Command::Close { reply } => {
                let result = CommandHandlers::handle_close(&mut self.state);
                let _ = reply.send(result.as_ref().map(|_| ()).map_err(Clone::clone));
                self.running = false;
                result
            }
        };
        self.finish(name, result);
    }

    fn process_event(&mut self, event: Event) {
        trace!(event = event.name(), "Processing event");
        self.state.stats.events_processed += 1;
        let name = event.name();

        let result = match event {
            Event::Connected => EventHandlers::handle_connected(&mut self.state),
            Event::ConnectAttemptFailed {
                attempt,
                reason,
                retry_in,
            } => EventHandlers::handle_attempt_failed(&mut self.state, attempt, reason, retry_in),
            Event::ConnectFailed { reason } => {
                EventHandlers::handle_connect_failed(&mut self.state, reason)
            }
            Event::LinkLost { reason } => EventHandlers::handle_link_lost(&mut self.state, reason),
            Event::Disconnected => {
                debug!("Transport confirmed link closed");
                Ok(Outputs::default())
            }
            Event::FrameReceived(frame) => EventHandlers::handle_frame(&mut self.state, frame),
            Event::MalformedFrame { reason } => {
                EventHandlers::handle_malformed(&mut self.state, reason)
            }
        };
        self.finish(name, result);
    }

    /// Dispatch handler outputs, or log why there are none
    fn finish(&mut self, input: &'static str, result: SyncResult<Outputs>) {
        match result {
            Ok(outputs) => self.dispatch(outputs),
            Err(SyncError::StateTransition(error)) => {
                debug!(input, %error, "Input ignored in current connection state");
            }
            Err(error) => error!(input, %error, "Handler failed"),
        }
    }

    fn dispatch(&mut self, outputs: Outputs) {
        for effect in outputs.effects {
            if self.effect_sender.send(effect).is_err() {
                warn!("Transport is gone, effect dropped");
            }
        }
        for event in outputs.app_events {
            // No observers is not an error.
            let _ = self.app_event_sender.send(event);
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
