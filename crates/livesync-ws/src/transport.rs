//! WebSocket transport task
//!
//! Owns one WebSocket link at a time. Between `Open` and `Close` it keeps trying to
//! hold a link up, reporting every failed attempt and giving up once its backoff
//! policy is exhausted. A dropped link waits out the backoff like a failed attempt;
//! the attempt count only starts over once a link has carried a frame or stayed up
//! for `stable_after`. Frames are JSON text messages in both directions.

use crate::config::WsTransportConfig;
use crate::error::WsTransportError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use livesync_core::{
    Backoff, Effect, EffectReceiver, Endpoint, Event, EventSender, ServerFrame, SyncError,
    SyncResult, TransportTask,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the handshake request for `endpoint`, with its bearer credential if any
pub fn build_request(endpoint: &Endpoint) -> Result<Request, WsTransportError> {
    let url = Url::parse(endpoint.url()).map_err(|err| WsTransportError::InvalidUrl {
        url: endpoint.url().to_string(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => {}
        scheme => {
            return Err(WsTransportError::UnsupportedScheme {
                scheme: scheme.to_string(),
            })
        }
    }

    let mut request = url.as_str().into_client_request()?;
    if let Some(token) = endpoint.credentials() {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| WsTransportError::InvalidCredentials)?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

/// How a connected link ended
enum LinkEnd {
    Lost(String),
    Recycle,
    Closed,
    Shutdown,
}

/// A link that has ended, with what it carried while it was up
struct Link {
    end: LinkEnd,
    up_for: Duration,
    frames_received: u64,
}

impl Link {
    /// Whether the link proved usable, so the next drop starts a fresh backoff cycle
    fn is_healthy(&self, stable_after: Duration) -> bool {
        self.frames_received > 0 || self.up_for >= stable_after
    }
}

/// How a session (`Open` until `Close`) ended
enum SessionEnd {
    Closed,
    Shutdown,
}

/// What an effect means while no link is up
enum Idle {
    Continue,
    Close,
    Shutdown,
}

// ----------------------------------------------------------------------------
// WebSocket Transport Task
// ----------------------------------------------------------------------------

pub struct WebSocketTransport {
    config: WsTransportConfig,
    event_sender: Option<EventSender>,
    effect_receiver: Option<EffectReceiver>,
}

impl WebSocketTransport {
    pub fn new(config: WsTransportConfig) -> Self {
        Self {
            config,
            event_sender: None,
            effect_receiver: None,
        }
    }

    async fn emit(events: &EventSender, event: Event) -> SyncResult<()> {
        events
            .send(event)
            .await
            .map_err(|_| SyncError::channel_error("engine stopped receiving events"))
    }

    fn idle_effect(effect: Option<Effect>) -> Idle {
        match effect {
            Some(Effect::Send(frame)) => {
                debug!(kind = frame.kind(), "No link, frame dropped");
                Idle::Continue
            }
            Some(Effect::Open { .. }) | Some(Effect::Recycle { .. }) => Idle::Continue,
            Some(Effect::Close) => Idle::Close,
            Some(Effect::Shutdown) | None => Idle::Shutdown,
        }
    }

    async fn connect_once(&self, endpoint: &Endpoint) -> Result<WsStream, WsTransportError> {
        let request = build_request(endpoint)?;
        match timeout(self.config.connect_timeout, connect_async(request)).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(err)) => Err(WsTransportError::from_handshake(err)),
            Err(_) => Err(WsTransportError::ConnectTimeout {
                after: self.config.connect_timeout,
            }),
        }
    }

    /// Keep a link up for `endpoint` until closed or out of attempts
    async fn session(
        &self,
        endpoint: &Endpoint,
        effects: &mut EffectReceiver,
        events: &EventSender,
    ) -> SyncResult<SessionEnd> {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            info!(%endpoint, attempt = backoff.attempts() + 1, "Connecting");
            let attempt = {
                let connect = self.connect_once(endpoint);
                tokio::pin!(connect);
                loop {
                    tokio::select! {
                        result = &mut connect => break result,
                        effect = effects.recv() => match Self::idle_effect(effect) {
                            Idle::Continue => {}
                            Idle::Close => {
                                Self::emit(events, Event::Disconnected).await?;
                                return Ok(SessionEnd::Closed);
                            }
                            Idle::Shutdown => return Ok(SessionEnd::Shutdown),
                        },
                    }
                }
            };

            let reason = match attempt {
                Ok(stream) => {
                    info!(%endpoint, "WebSocket connected");
                    Self::emit(events, Event::Connected).await?;
                    let link = self.pump(stream, effects, events).await?;
                    if link.is_healthy(self.config.stable_after) {
                        backoff.reset();
                    }
                    match link.end {
                        LinkEnd::Lost(reason) => {
                            warn!(%reason, "WebSocket link lost");
                            Self::emit(events, Event::LinkLost { reason: reason.clone() }).await?;
                            if !self.config.auto_reconnect {
                                Self::emit(events, Event::ConnectFailed { reason }).await?;
                                return Ok(SessionEnd::Closed);
                            }
                            reason
                        }
                        LinkEnd::Recycle => "link recycled".to_string(),
                        LinkEnd::Closed => {
                            Self::emit(events, Event::Disconnected).await?;
                            return Ok(SessionEnd::Closed);
                        }
                        LinkEnd::Shutdown => return Ok(SessionEnd::Shutdown),
                    }
                }
                Err(err) if err.is_permanent() => {
                    warn!(%err, "Endpoint cannot be reached as configured");
                    Self::emit(events, Event::ConnectFailed { reason: err.to_string() }).await?;
                    return Ok(SessionEnd::Closed);
                }
                Err(err) => err.to_string(),
            };

            let Some(retry_in) = backoff.next_delay() else {
                warn!(%reason, attempts = backoff.attempts(), "Giving up on endpoint");
                Self::emit(events, Event::ConnectFailed { reason }).await?;
                return Ok(SessionEnd::Closed);
            };
            debug!(%reason, retry_in_ms = retry_in.as_millis() as u64, "Connection attempt failed");
            Self::emit(
                events,
                Event::ConnectAttemptFailed {
                    attempt: backoff.attempts(),
                    reason,
                    retry_in,
                },
            )
            .await?;

            match Self::wait(retry_in, effects).await {
                Idle::Continue => {}
                Idle::Close => {
                    Self::emit(events, Event::Disconnected).await?;
                    return Ok(SessionEnd::Closed);
                }
                Idle::Shutdown => return Ok(SessionEnd::Shutdown),
            }
        }
    }

    /// Sleep out a retry delay while still honouring `Close` and `Shutdown`
    async fn wait(delay: Duration, effects: &mut EffectReceiver) -> Idle {
        let deadline = sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return Idle::Continue,
                effect = effects.recv() => match Self::idle_effect(effect) {
                    Idle::Continue => {}
                    other => return other,
                },
            }
        }
    }

    /// Move frames across a connected link until it ends
    async fn pump(
        &self,
        stream: WsStream,
        effects: &mut EffectReceiver,
        events: &EventSender,
    ) -> SyncResult<Link> {
        let connected_at = Instant::now();
        let mut frames_received = 0u64;
        let end = self
            .pump_frames(stream, effects, events, &mut frames_received)
            .await?;
        Ok(Link {
            end,
            up_for: connected_at.elapsed(),
            frames_received,
        })
    }

    async fn pump_frames(
        &self,
        stream: WsStream,
        effects: &mut EffectReceiver,
        events: &EventSender,
        frames_received: &mut u64,
    ) -> SyncResult<LinkEnd> {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                biased;

                effect = effects.recv() => match effect {
                    Some(Effect::Send(frame)) => {
                        let text = match frame.encode() {
                            Ok(text) => text,
                            Err(error) => {
                                warn!(%error, kind = frame.kind(), "Frame failed to encode");
                                continue;
                            }
                        };
                        trace!(kind = frame.kind(), bytes = text.len(), "Sending frame");
                        if let Err(error) = write.send(Message::Text(text)).await {
                            return Ok(LinkEnd::Lost(error.to_string()));
                        }
                    }
                    Some(Effect::Open { .. }) => {}
                    Some(Effect::Recycle { reason }) => {
                        info!(%reason, "Recycling WebSocket link");
                        let _ = write.close().await;
                        return Ok(LinkEnd::Recycle);
                    }
                    Some(Effect::Close) => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(LinkEnd::Closed);
                    }
                    Some(Effect::Shutdown) | None => {
                        let _ = write.close().await;
                        return Ok(LinkEnd::Shutdown);
                    }
                },

                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        *frames_received += 1;
                        Self::forward(events, &text).await?
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            *frames_received += 1;
                            Self::forward(events, &text).await?
                        }
                        Err(_) => {
                            Self::emit(events, Event::MalformedFrame {
                                reason: "binary message is not UTF-8".to_string(),
                            })
                            .await?
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(error) = write.send(Message::Pong(payload)).await {
                            return Ok(LinkEnd::Lost(error.to_string()));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("closed by server: {} {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                        return Ok(LinkEnd::Lost(reason));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => return Ok(LinkEnd::Lost(error.to_string())),
                    None => return Ok(LinkEnd::Lost("stream ended".to_string())),
                },
            }
        }
    }

    async fn forward(events: &EventSender, text: &str) -> SyncResult<()> {
        let event = match ServerFrame::decode(text) {
            Ok(frame) => Event::FrameReceived(frame),
            Err(error) => Event::MalformedFrame {
                reason: error.to_string(),
            },
        };
        Self::emit(events, event).await
    }
}

#[async_trait]
impl TransportTask for WebSocketTransport {
    fn attach_channels(
        &mut self,
        event_sender: EventSender,
        effect_receiver: EffectReceiver,
    ) -> SyncResult<()> {
        self.config.validate()?;
        self.event_sender = Some(event_sender);
        self.effect_receiver = Some(effect_receiver);
        Ok(())
    }

    async fn run(&mut self) -> SyncResult<()> {
        let events = self
            .event_sender
            .clone()
            .ok_or(WsTransportError::ChannelsNotAttached)?;
        let mut effects = self
            .effect_receiver
            .take()
            .ok_or(WsTransportError::ChannelsNotAttached)?;
        info!("WebSocket transport started");

        loop {
            match effects.recv().await {
                Some(Effect::Open { endpoint }) => {
                    match self.session(&endpoint, &mut effects, &events).await? {
                        SessionEnd::Closed => {}
                        SessionEnd::Shutdown => break,
                    }
                }
                Some(Effect::Close) => Self::emit(&events, Event::Disconnected).await?,
                other => match Self::idle_effect(other) {
                    Idle::Shutdown => break,
                    Idle::Continue | Idle::Close => {}
                },
            }
        }

        info!("WebSocket transport stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
