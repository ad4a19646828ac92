//! The transcription session state machine.
//!
//! The session runs as a single sequential task that owns all mutable
//! state: the `SessionState`, the prebuffer, the transport sink, and the
//! shutdown coordinator. Capture threads and the transport reader hand
//! everything over through channels, so no state is ever read-modify-
//! written from two threads. Connect completions, inbound messages, and
//! grace-timer expirations carry the generation or epoch they were started
//! under; anything stale by the time it arrives is a no-op.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::AudioFrame;
use crate::auth::{acquire_stream_token, TokenIssuer};
use crate::error::SessionError;
use crate::protocol::{self, InboundEvent, SessionConfig};
use crate::session::prebuffer::AudioPrebuffer;
use crate::session::shutdown::{ShutdownCoordinator, TimerArm};
use crate::settings::SessionSettings;
use crate::transport::{
    Incoming, TransportConnector, TransportError, TransportSink, TransportStream,
};

/// Protocol-level state of one recording attempt. Distinct from whatever
/// recording indicator a host UI shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Buffering,
    Connecting,
    Streaming,
    PendingDisconnect,
    Closed,
}

/// Events emitted by the session, in processing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transport open, handshake sent, prebuffer flushed.
    Connected,
    /// Committed text from the backend, control markers stripped.
    FinalWords(String),
    /// The current provisional suffix; an empty string clears any prior
    /// provisional display.
    ProvisionalWords(String),
    /// The grace window elapsed after a stop: hosts should accept the
    /// outstanding provisional text and add the utterance separator.
    Finalized,
    Error(SessionError),
    Disconnected,
}

enum Command {
    StartBuffering,
    Connect,
    Audio(AudioFrame),
    Stop,
    Disconnect,
}

type ConnectPayload = (Box<dyn TransportSink>, Box<dyn TransportStream>, String);

enum Internal {
    ConnectResolved {
        generation: u64,
        result: Result<ConnectPayload, SessionError>,
    },
    Inbound {
        generation: u64,
        item: Result<Incoming, TransportError>,
    },
    GraceExpired {
        epoch: u64,
    },
}

/// Cloneable handle driving a spawned session. All methods are fire-and-
/// forget; outcomes arrive on the event stream.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    /// Arm the prebuffer: Idle -> Buffering. Capture can start immediately
    /// afterwards without losing speech.
    pub fn start_buffering(&self) {
        let _ = self.commands.send(Command::StartBuffering);
    }

    /// Begin the token exchange and transport handshake in the background:
    /// Buffering -> Connecting.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Route a captured frame to the prebuffer or the open transport
    /// depending on session state. Frames outside those states are
    /// silently dropped.
    pub fn send_audio(&self, frame: AudioFrame) {
        let _ = self.commands.send(Command::Audio(frame));
    }

    /// User stop: enter the trailing-token grace period instead of tearing
    /// down immediately.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Tear down unconditionally. Safe from any state, any number of
    /// times.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }
}

/// Factory for session actors.
pub struct TranscriptionSession;

impl TranscriptionSession {
    /// Spawn a session task and return its handle plus event stream.
    ///
    /// The task lives until every handle clone is dropped; the same
    /// session may run multiple recording attempts back to back via
    /// `start_buffering`.
    pub fn spawn(
        settings: SessionSettings,
        issuer: Arc<dyn TokenIssuer>,
        connector: Arc<dyn TransportConnector>,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            settings,
            issuer,
            connector,
            events: event_tx,
            internal_tx,
            state: SessionState::Idle,
            prebuffer: AudioPrebuffer::new(),
            shutdown: None,
            sink: None,
            generation: 0,
        };

        tokio::spawn(run(actor, command_rx, internal_rx));

        (SessionHandle { commands: command_tx }, event_rx)
    }
}

struct SessionActor {
    settings: SessionSettings,
    issuer: Arc<dyn TokenIssuer>,
    connector: Arc<dyn TransportConnector>,
    events: mpsc::UnboundedSender<SessionEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    state: SessionState,
    prebuffer: AudioPrebuffer,
    shutdown: Option<ShutdownCoordinator>,
    sink: Option<Box<dyn TransportSink>>,
    generation: u64,
}

async fn run(
    mut actor: SessionActor,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut internal: mpsc::UnboundedReceiver<Internal>,
) {
    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(cmd) => actor.on_command(cmd).await,
                None => {
                    // Every handle dropped: release everything and stop.
                    actor.close_session();
                    break;
                }
            },
            Some(msg) = internal.recv() => actor.on_internal(msg).await,
        }
    }
}

impl SessionActor {
    async fn on_command(&mut self, command: Command) {
        match command {
            Command::StartBuffering => self.start_buffering(),
            Command::Connect => self.start_connect(),
            Command::Audio(frame) => self.route_audio(frame).await,
            Command::Stop => self.request_stop(),
            Command::Disconnect => self.close_session(),
        }
    }

    async fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::ConnectResolved { generation, result } => {
                self.connect_resolved(generation, result).await
            }
            Internal::Inbound { generation, item } => self.inbound(generation, item),
            Internal::GraceExpired { epoch } => self.grace_expired(epoch),
        }
    }

    fn start_buffering(&mut self) {
        match self.state {
            SessionState::Idle | SessionState::Closed => {
                self.prebuffer.arm();
                self.shutdown = Some(ShutdownCoordinator::new(self.settings.grace_period()));
                self.state = SessionState::Buffering;
                debug!("session buffering");
            }
            _ => warn!("start_buffering ignored in state {:?}", self.state),
        }
    }

    fn start_connect(&mut self) {
        if self.state != SessionState::Buffering {
            warn!("connect ignored in state {:?}", self.state);
            return;
        }
        self.state = SessionState::Connecting;
        self.generation += 1;

        let generation = self.generation;
        let issuer = self.issuer.clone();
        let connector = self.connector.clone();
        let internal_tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let result = async {
                let grant = acquire_stream_token(issuer.as_ref()).await?;
                let (sink, stream) = connector
                    .connect(&grant.websocket_url)
                    .await
                    .map_err(|e| SessionError::Transport(e.0))?;
                Ok((sink, stream, grant.token))
            }
            .await;
            let _ = internal_tx.send(Internal::ConnectResolved { generation, result });
        });
        debug!("session connecting (generation {})", generation);
    }

    async fn route_audio(&mut self, frame: AudioFrame) {
        match self.state {
            SessionState::Buffering | SessionState::Connecting => self.prebuffer.append(frame),
            SessionState::Streaming => {
                let sink = match self.sink.as_mut() {
                    Some(sink) => sink,
                    None => return,
                };
                if let Err(e) = sink.send_binary(frame.into_bytes()).await {
                    self.transport_failed(e);
                }
            }
            // Capture racing ahead of or behind the session state.
            _ => {}
        }
    }

    fn request_stop(&mut self) {
        match self.state {
            SessionState::Buffering
            | SessionState::Connecting
            | SessionState::Streaming
            | SessionState::PendingDisconnect => {
                if let Some(arm) = self.shutdown.as_mut().and_then(|s| s.request_stop()) {
                    self.state = SessionState::PendingDisconnect;
                    self.arm_grace_timer(arm);
                }
            }
            SessionState::Idle | SessionState::Closed => {
                debug!("stop while not recording, nothing to do");
            }
        }
    }

    async fn connect_resolved(
        &mut self,
        generation: u64,
        result: Result<ConnectPayload, SessionError>,
    ) {
        let relevant = generation == self.generation
            && matches!(
                self.state,
                SessionState::Connecting | SessionState::PendingDisconnect
            );
        if !relevant {
            // Stale completion: the user disconnected (or a newer attempt
            // started) while this connect was in flight. Just release the
            // transport if one was opened.
            debug!("discarding stale connect completion (generation {})", generation);
            if let Ok((mut sink, _stream, _token)) = result {
                tokio::spawn(async move {
                    let _ = sink.close().await;
                });
            }
            return;
        }

        let (mut sink, stream, api_key) = match result {
            Ok(payload) => payload,
            Err(error) => {
                warn!("connect failed: {}", error);
                self.emit(SessionEvent::Error(error));
                self.close_session();
                return;
            }
        };

        // First message on the wire is always the configuration handshake.
        let config = SessionConfig::new(api_key, &self.settings);
        let handshake = match serde_json::to_string(&config) {
            Ok(json) => json,
            Err(e) => {
                self.emit(SessionEvent::Error(SessionError::Transport(e.to_string())));
                self.close_session();
                return;
            }
        };
        if let Err(e) = sink.send_text(handshake).await {
            self.transport_failed(e);
            return;
        }

        // Replay everything captured while connecting, in capture order,
        // before any live frame can be routed to the transport.
        let buffered = self.prebuffer.drain_in_order();
        if !buffered.is_empty() {
            info!("flushing {} prebuffered frames", buffered.len());
        }
        for frame in buffered {
            if let Err(e) = sink.send_binary(frame.into_bytes()).await {
                self.transport_failed(e);
                return;
            }
        }

        self.sink = Some(sink);
        if self.state == SessionState::Connecting {
            self.state = SessionState::Streaming;
        }
        self.spawn_reader(stream, generation);
        self.emit(SessionEvent::Connected);
        info!("session connected");
    }

    fn spawn_reader(&self, mut stream: Box<dyn TransportStream>, generation: u64) {
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            loop {
                let item = match stream.next_message().await {
                    Some(item) => item,
                    None => Ok(Incoming::Closed),
                };
                let finished = matches!(item, Ok(Incoming::Closed) | Err(_));
                if internal_tx
                    .send(Internal::Inbound { generation, item })
                    .is_err()
                    || finished
                {
                    break;
                }
            }
        });
    }

    fn inbound(&mut self, generation: u64, item: Result<Incoming, TransportError>) {
        if generation != self.generation || self.state == SessionState::Closed {
            return;
        }

        match item {
            Ok(Incoming::Text(raw)) => self.inbound_text(&raw),
            Ok(Incoming::Closed) => {
                debug!("transport closed by peer");
                self.close_session();
            }
            Err(error) => self.transport_failed(error),
        }
    }

    fn inbound_text(&mut self, raw: &str) {
        let event = match protocol::parse_message(raw) {
            Some(event) => event,
            None => {
                debug!("ignoring unrecognized backend message");
                return;
            }
        };

        match event {
            InboundEvent::Tokens {
                final_text,
                provisional_text,
            } => {
                let has_final = !final_text.is_empty();
                if has_final {
                    self.emit(SessionEvent::FinalWords(final_text));
                    // Trailing tokens after a stop earn the backend a fresh
                    // grace window.
                    if let Some(arm) = self.shutdown.as_mut().and_then(|s| s.on_final_words()) {
                        self.arm_grace_timer(arm);
                    }
                }
                if !provisional_text.is_empty() {
                    self.emit(SessionEvent::ProvisionalWords(provisional_text));
                } else if has_final {
                    // Final text with no fresh provisional run clears any
                    // stale provisional display.
                    self.emit(SessionEvent::ProvisionalWords(String::new()));
                }
            }
            InboundEvent::Error(message) => {
                warn!("backend error: {}", message);
                // Teardown is the owner's call; the session stays put so
                // the owner's disconnect finds a live transport to close.
                self.emit(SessionEvent::Error(SessionError::Backend(message)));
            }
        }
    }

    fn grace_expired(&mut self, epoch: u64) {
        let expired = self
            .shutdown
            .as_mut()
            .map(|s| s.timer_expired(epoch))
            .unwrap_or(false);
        if expired {
            info!("grace period elapsed, finalizing session");
            self.emit(SessionEvent::Finalized);
            self.close_session();
        }
    }

    fn arm_grace_timer(&self, arm: TimerArm) {
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(arm.after).await;
            let _ = internal_tx.send(Internal::GraceExpired { epoch: arm.epoch });
        });
    }

    fn transport_failed(&mut self, error: TransportError) {
        warn!("transport failure: {}", error);
        self.emit(SessionEvent::Error(SessionError::Transport(error.0)));
        self.close_session();
    }

    /// Unconditional teardown into `Closed`. Idempotent; invalidates any
    /// in-flight connect, reader, or grace timer via the generation bump.
    fn close_session(&mut self) {
        self.generation += 1;
        if let Some(mut sink) = self.sink.take() {
            tokio::spawn(async move {
                let _ = sink.close().await;
            });
        }
        self.prebuffer.clear();
        if let Some(shutdown) = self.shutdown.as_mut() {
            shutdown.cancel();
        }

        let was_active = !matches!(self.state, SessionState::Idle | SessionState::Closed);
        self.state = SessionState::Closed;
        if was_active {
            self.emit(SessionEvent::Disconnected);
            info!("session closed");
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
