//! Mock Transport for Testing
//!
//! A deterministic transport with no network underneath. Frames the engine sends
//! arrive at the paired [`MockServer`], and frames the server pushes go through the
//! same JSON decoding a real transport performs. Link loss and refused connections
//! happen only when the test asks for them.

use async_trait::async_trait;
use livesync_core::{
    Args, ClientFrame, CorrelationId, Effect, EffectReceiver, Event, EventSender, ServerFrame,
    SubscriptionId, SyncError, SyncResult, TransportTask, Value,
};
use std::future::pending;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, trace};

/// How long [`MockServer::next_frame`] waits before giving up
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(1);

// ----------------------------------------------------------------------------
// Mock Transport Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MockTransportConfig {
    /// Whether connection attempts succeed initially
    pub accept_connections: bool,
    /// Attempts per `Open` before reporting `ConnectFailed`
    pub max_attempts: u32,
    /// Delay reported and waited between failed attempts
    pub retry_delay: Duration,
}

impl Default for MockTransportConfig {
    fn default() -> Self {
        Self {
            accept_connections: true,
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
        }
    }
}

impl MockTransportConfig {
    /// Transport whose attempts are refused until [`MockServer::set_accept`]
    pub fn refusing() -> Self {
        Self {
            accept_connections: false,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

// ----------------------------------------------------------------------------
// Shared control state
// ----------------------------------------------------------------------------

enum MockControl {
    Push(String),
    DropLink { reason: String },
    Restore,
}

#[derive(Default)]
struct Shared {
    accept: AtomicBool,
    link_up: AtomicBool,
    opens: AtomicU32,
    recycles: AtomicU32,
}

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

pub struct MockTransport {
    config: MockTransportConfig,
    event_sender: Option<EventSender>,
    effect_receiver: Option<EffectReceiver>,
    control_receiver: mpsc::UnboundedReceiver<MockControl>,
    inbox: mpsc::UnboundedSender<ClientFrame>,
    shared: Arc<Shared>,
    /// Between `Open` and `Close`
    session_open: bool,
    attempt: u32,
    retry_at: Option<Instant>,
}

impl MockTransport {
    /// Create a transport and the controller for its backend side
    pub fn new(config: MockTransportConfig) -> (Self, MockServer) {
        let (control_sender, control_receiver) = mpsc::unbounded_channel();
        let (inbox_sender, inbox_receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        shared
            .accept
            .store(config.accept_connections, Ordering::SeqCst);

        let transport = Self {
            config,
            event_sender: None,
            effect_receiver: None,
            control_receiver,
            inbox: inbox_sender,
            shared: Arc::clone(&shared),
            session_open: false,
            attempt: 0,
            retry_at: None,
        };
        let server = MockServer {
            control: control_sender,
            inbox: inbox_receiver,
            shared,
        };
        (transport, server)
    }

    fn link_up(&self) -> bool {
        self.shared.link_up.load(Ordering::SeqCst)
    }

    fn set_link(&self, up: bool) {
        self.shared.link_up.store(up, Ordering::SeqCst);
    }

    async fn emit(&self, events: &EventSender, event: Event) -> SyncResult<()> {
        events
            .send(event)
            .await
            .map_err(|_| SyncError::channel_error("engine stopped receiving events"))
    }

    /// One connection attempt; schedules the next one on failure
    async fn attempt_connect(&mut self, events: &EventSender) -> SyncResult<()> {
        self.retry_at = None;
        if self.shared.accept.load(Ordering::SeqCst) {
            self.attempt = 0;
            self.set_link(true);
            debug!("Mock link established");
            return self.emit(events, Event::Connected).await;
        }

        self.attempt += 1;
        if self.attempt >= self.config.max_attempts {
            self.attempt = 0;
            self.session_open = false;
            return self
                .emit(
                    events,
                    Event::ConnectFailed {
                        reason: "connection refused".to_string(),
                    },
                )
                .await;
        }

        self.retry_at = Some(Instant::now() + self.config.retry_delay);
        self.emit(
            events,
            Event::ConnectAttemptFailed {
                attempt: self.attempt,
                reason: "connection refused".to_string(),
                retry_in: self.config.retry_delay,
            },
        )
        .await
    }

    async fn handle_effect(&mut self, effect: Effect, events: &EventSender) -> SyncResult<bool> {
        match effect {
            Effect::Open { endpoint } => {
                debug!(%endpoint, "Mock open requested");
                self.shared.opens.fetch_add(1, Ordering::SeqCst);
                self.session_open = true;
                self.attempt = 0;
                self.attempt_connect(events).await?;
            }
            Effect::Send(frame) => {
                if self.link_up() {
                    trace!(kind = frame.kind(), "Mock frame sent");
                    let _ = self.inbox.send(frame);
                } else {
                    debug!(kind = frame.kind(), "Mock link down, frame dropped");
                }
            }
            Effect::Recycle { reason } => {
                debug!(%reason, "Mock link recycled");
                self.shared.recycles.fetch_add(1, Ordering::SeqCst);
                self.set_link(false);
                if self.session_open {
                    self.attempt_connect(events).await?;
                }
            }
            Effect::Close => {
                self.set_link(false);
                self.session_open = false;
                self.retry_at = None;
                self.emit(events, Event::Disconnected).await?;
            }
            Effect::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    async fn handle_control(&mut self, control: MockControl, events: &EventSender) -> SyncResult<()> {
        match control {
            MockControl::Push(text) => {
                if !self.link_up() {
                    debug!("Mock link down, pushed frame dropped");
                    return Ok(());
                }
                let event = match ServerFrame::decode(&text) {
                    Ok(frame) => Event::FrameReceived(frame),
                    Err(error) => Event::MalformedFrame {
                        reason: error.to_string(),
                    },
                };
                self.emit(events, event).await
            }
            MockControl::DropLink { reason } => {
                if self.link_up() {
                    self.set_link(false);
                    self.emit(events, Event::LinkLost { reason }).await
                } else {
                    Ok(())
                }
            }
            MockControl::Restore => {
                if self.session_open && !self.link_up() {
                    self.attempt_connect(events).await
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[async_trait]
impl TransportTask for MockTransport {
    fn attach_channels(
        &mut self,
        event_sender: EventSender,
        effect_receiver: EffectReceiver,
    ) -> SyncResult<()> {
        self.event_sender = Some(event_sender);
        self.effect_receiver = Some(effect_receiver);
        Ok(())
    }

    async fn run(&mut self) -> SyncResult<()> {
        let events = self
            .event_sender
            .clone()
            .ok_or_else(|| SyncError::channel_error("mock transport channels not attached"))?;
        let mut effects = self
            .effect_receiver
            .take()
            .ok_or_else(|| SyncError::channel_error("mock transport channels not attached"))?;
        let mut controls_open = true;

        loop {
            let retry_at = self.retry_at;
            // Effects first: a frame sent before a scripted link change sees the old link.
            tokio::select! {
                biased;

                effect = effects.recv() => match effect {
                    Some(effect) => {
                        if !self.handle_effect(effect, &events).await? {
                            break;
                        }
                    }
                    None => break,
                },
                control = self.control_receiver.recv(), if controls_open => match control {
                    Some(control) => self.handle_control(control, &events).await?,
                    None => controls_open = false,
                },
                _ = retry_after(retry_at) => self.attempt_connect(&events).await?,
            }
        }

        self.set_link(false);
        debug!("Mock transport stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

async fn retry_after(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

// ----------------------------------------------------------------------------
// Mock Server
// ----------------------------------------------------------------------------

/// The backend's end of a [`MockTransport`]
pub struct MockServer {
    control: mpsc::UnboundedSender<MockControl>,
    inbox: mpsc::UnboundedReceiver<ClientFrame>,
    shared: Arc<Shared>,
}

impl MockServer {
    /// Next frame the client sent, or `None` after [`FRAME_TIMEOUT`]
    pub async fn next_frame(&mut self) -> Option<ClientFrame> {
        timeout(FRAME_TIMEOUT, self.inbox.recv()).await.ok().flatten()
    }

    /// Next frame the client sent; panics if none arrives in time
    pub async fn expect_frame(&mut self) -> ClientFrame {
        match self.next_frame().await {
            Some(frame) => frame,
            None => panic!("Timeout waiting for client frame"),
        }
    }

    /// Next frame, which must be a `Subscribe`
    pub async fn expect_subscribe(&mut self) -> (SubscriptionId, String, Args) {
        match self.expect_frame().await {
            ClientFrame::Subscribe { id, name, args } => (id, name, args),
            other => panic!("Expected Subscribe, got {other:?}"),
        }
    }

    /// Next frame, which must be a `Mutate`
    pub async fn expect_mutate(&mut self) -> (CorrelationId, String, Args) {
        match self.expect_frame().await {
            ClientFrame::Mutate {
                correlation_id,
                name,
                args,
            } => (correlation_id, name, args),
            other => panic!("Expected Mutate, got {other:?}"),
        }
    }

    /// Panics if the client sends anything within `within`
    pub async fn assert_no_frame(&mut self, within: Duration) {
        if let Ok(Some(frame)) = timeout(within, self.inbox.recv()).await {
            panic!("Unexpected client frame {frame:?}");
        }
    }

    /// Deliver a frame to the client; dropped while the link is down
    pub fn push(&self, frame: ServerFrame) {
        match frame.encode() {
            Ok(text) => self.push_raw(text),
            Err(error) => panic!("Server frame failed to encode: {error}"),
        }
    }

    /// Deliver raw text, as if it came off the wire
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.control.send(MockControl::Push(text.into()));
    }

    pub fn query_result(&self, id: SubscriptionId, version: u64, value: Value) {
        self.push(ServerFrame::QueryResult { id, version, value });
    }

    pub fn ack(&self, correlation_id: CorrelationId, value: Value) {
        self.push(ServerFrame::ack(correlation_id, value));
    }

    pub fn reject(&self, correlation_id: CorrelationId, error: impl Into<String>) {
        self.push(ServerFrame::nack(correlation_id, error));
    }

    /// Break the link; it stays down until [`MockServer::reconnect`]
    pub fn drop_link(&self, reason: impl Into<String>) {
        let _ = self.control.send(MockControl::DropLink {
            reason: reason.into(),
        });
    }

    /// Bring a dropped link back up (subject to [`MockServer::set_accept`])
    pub fn reconnect(&self) {
        let _ = self.control.send(MockControl::Restore);
    }

    pub fn set_accept(&self, accept: bool) {
        self.shared.accept.store(accept, Ordering::SeqCst);
    }

    pub fn is_link_up(&self) -> bool {
        self.shared.link_up.load(Ordering::SeqCst)
    }

    /// Number of `Open` effects the transport has executed
    pub fn opens(&self) -> u32 {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Number of `Recycle` effects the transport has executed
    pub fn recycles(&self) -> u32 {
        self.shared.recycles.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesync_core::{create_effect_channel, create_event_channel, ChannelConfig, Endpoint};

    struct Rig {
        server: MockServer,
        events: mpsc::Receiver<Event>,
        effects: livesync_core::EffectSender,
        task: tokio::task::JoinHandle<SyncResult<()>>,
    }

    fn rig(config: MockTransportConfig) -> Rig {
        let (mut transport, server) = MockTransport::new(config);
        let (event_sender, events) = create_event_channel(&ChannelConfig::testing());
        let (effects, effect_receiver) = create_effect_channel();
        transport.attach_channels(event_sender, effect_receiver).unwrap();
        let task = tokio::spawn(async move { transport.run().await });
        Rig {
            server,
            events,
            effects,
            task,
        }
    }

    fn open() -> Effect {
        Effect::Open {
            endpoint: Endpoint::new("ws://mock.test"),
        }
    }

    #[tokio::test]
    async fn test_open_and_exchange_frames() {
        let mut rig = rig(MockTransportConfig::default());
        rig.effects.send(open()).unwrap();
        assert_eq!(rig.events.recv().await, Some(Event::Connected));
        assert!(rig.server.is_link_up());

        rig.effects
            .send(Effect::Send(ClientFrame::Unsubscribe {
                id: SubscriptionId::new(1),
            }))
            .unwrap();
        assert_eq!(
            rig.server.expect_frame().await,
            ClientFrame::Unsubscribe {
                id: SubscriptionId::new(1)
            }
        );

        rig.server.push_raw("{not json");
        assert!(matches!(
            rig.events.recv().await,
            Some(Event::MalformedFrame { .. })
        ));

        rig.effects.send(Effect::Shutdown).unwrap();
        assert!(rig.task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_attempts_end_in_failure() {
        let mut rig = rig(MockTransportConfig::refusing().with_max_attempts(2));
        rig.effects.send(open()).unwrap();

        assert!(matches!(
            rig.events.recv().await,
            Some(Event::ConnectAttemptFailed { attempt: 1, .. })
        ));
        assert!(matches!(
            rig.events.recv().await,
            Some(Event::ConnectFailed { .. })
        ));
        assert_eq!(rig.server.opens(), 1);
        assert!(!rig.server.is_link_up());
    }

    #[tokio::test]
    async fn test_drop_and_restore_link() {
        let mut rig = rig(MockTransportConfig::default());
        rig.effects.send(open()).unwrap();
        assert_eq!(rig.events.recv().await, Some(Event::Connected));

        rig.server.drop_link("cable pulled");
        assert_eq!(
            rig.events.recv().await,
            Some(Event::LinkLost {
                reason: "cable pulled".into()
            })
        );

        rig.effects
            .send(Effect::Send(ClientFrame::Unsubscribe {
                id: SubscriptionId::new(1),
            }))
            .unwrap();
        rig.server.reconnect();
        assert_eq!(rig.events.recv().await, Some(Event::Connected));
        rig.server.assert_no_frame(Duration::from_millis(50)).await;
    }
}
