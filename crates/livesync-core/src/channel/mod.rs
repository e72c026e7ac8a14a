//! CSP channel types and constructors

pub mod communication;
pub mod utils;

pub use communication::{
    AppEvent, Command, Effect, EngineStats, EngineStatus, Event, Reply,
};
pub use utils::{
    create_app_event_channel, create_command_channel, create_effect_channel,
    create_event_channel, AppEventReceiver, AppEventSender, CommandReceiver, CommandSender,
    EffectReceiver, EffectSender, EventReceiver, EventSender,
};
