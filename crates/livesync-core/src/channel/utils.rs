//! Channel Utilities for CSP Communication

use crate::channel::communication::{AppEvent, Command, Effect, Event};
use crate::config::ChannelConfig;
use tokio::sync::{broadcast, mpsc};

pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;
pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;
pub type EffectSender = mpsc::UnboundedSender<Effect>;
pub type EffectReceiver = mpsc::UnboundedReceiver<Effect>;
pub type AppEventSender = broadcast::Sender<AppEvent>;
pub type AppEventReceiver = broadcast::Receiver<AppEvent>;

// ----------------------------------------------------------------------------
// Channel Creation Utilities
// ----------------------------------------------------------------------------

/// Create bounded command channel (client handle → engine)
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size)
}

/// Create bounded event channel (transport → engine)
pub fn create_event_channel(config: &ChannelConfig) -> (EventSender, EventReceiver) {
    mpsc::channel(config.event_buffer_size)
}

/// Create unbounded effect channel (engine → transport)
///
/// Unbounded so the engine never waits on a slow transport; the transport drains
/// it continuously and the engine only emits effects in response to input.
pub fn create_effect_channel() -> (EffectSender, EffectReceiver) {
    mpsc::unbounded_channel()
}

/// Create broadcast app event channel (engine → observers)
///
/// Observers that fall behind lose the oldest events rather than slowing the engine.
pub fn create_app_event_channel(config: &ChannelConfig) -> (AppEventSender, AppEventReceiver) {
    broadcast::channel(config.app_event_buffer_size)
}
