//! Transport Task Trait Definition
//!
//! Concrete implementations live in their own crates (`livesync-ws` for WebSocket,
//! `livesync-harness` for the in-memory mock).

use crate::channel::{EffectReceiver, EventSender};
use crate::errors::SyncResult;

/// Common interface for transport tasks
///
/// A transport task owns the physical link to one backend endpoint. It:
/// - runs independently via [`TransportTask::run`]
/// - executes [`Effect`](crate::Effect)s received from the engine
/// - reports link state and inbound frames as [`Event`](crate::Event)s
/// - retries connection attempts on its own, reporting each failure
/// - shares no state with the engine
///
/// Frames handed to a transport while its link is down may be dropped: the engine
/// replays everything that matters when it sees [`Event::Connected`](crate::Event::Connected).
#[async_trait::async_trait]
pub trait TransportTask: Send + Sync {
    /// Attach channels created by the runtime
    fn attach_channels(
        &mut self,
        event_sender: EventSender,
        effect_receiver: EffectReceiver,
    ) -> SyncResult<()>;

    /// Run the transport's main loop until [`Effect::Shutdown`](crate::Effect::Shutdown)
    /// or until the effect channel closes
    async fn run(&mut self) -> SyncResult<()>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}
