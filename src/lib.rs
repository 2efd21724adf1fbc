//! Live voice conversation client for the Speechmatics Flow service.
//!
//! One session loop owns all mutable session state. The transport, the
//! microphone and the user reach it through a single channel, so inbound
//! messages, resource hand-overs and commands are processed strictly in
//! order.
//!
//! ```text
//!   SessionHandle ─┐
//!   transport ─────┼──▶ mpsc ──▶ run_session_loop ──▶ reduce() ──▶ effects
//!   microphone ────┘                   │
//!                                      ├──▶ PlaybackScheduler (binary)
//!                                      └──▶ MessageLog + TranscriptCorrelator (text)
//! ```

pub mod audio;
pub mod effects;
pub mod metrics;
pub mod playback;
pub mod settings;
pub mod state_machine;
pub mod streaming;
pub mod token;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

pub use effects::{LiveBackend, SessionBackend, SessionInput, SessionResources};
pub use metrics::{MetricsCollector, MetricsSummary};
pub use state_machine::{CloseReason, Event, SessionError, State};
pub use streaming::{LogEntry, MessageLog, PromptResponsePair, TranscriptCorrelator};

use playback::PlaybackError;
use state_machine::{reduce, Effect};
use streaming::{decode_text, ClientMessage, InboundMessage, InboundText, ServerMessage};

/// Capacity of the session loop's input channel
const SESSION_CHANNEL_CAPACITY: usize = 256;

/// Session status for observers.
/// Uses tagged union format: { "status": "idle" } or { "status": "closed", "reason": "stopped" }
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SessionStatus {
    Idle,
    Connecting,
    AwaitingMicrophone,
    Streaming,
    /// Microphone failed; the connection is still up and receiving
    ReceiveOnly {
        reason: String,
    },
    Closed {
        reason: String,
        detail: Option<String>,
    },
}

fn close_detail(reason: &CloseReason) -> Option<String> {
    match reason {
        CloseReason::Stopped | CloseReason::CredentialMissing => None,
        CloseReason::ConnectionFailed(e)
        | CloseReason::ConnectionLost(e)
        | CloseReason::MicrophoneError(e) => Some(e.clone()),
        CloseReason::RemoteClosed(r) => r.clone(),
    }
}

/// Convert internal State to SessionStatus for observers
pub fn status_of(state: &State) -> SessionStatus {
    match state {
        State::Idle => SessionStatus::Idle,
        State::Connecting { .. } => SessionStatus::Connecting,
        State::AwaitingMicrophone { .. } => SessionStatus::AwaitingMicrophone,
        State::Streaming { .. } => SessionStatus::Streaming,
        State::Closed {
            session_id: Some(_),
            reason,
        } => SessionStatus::ReceiveOnly {
            reason: close_detail(reason).unwrap_or_else(|| reason.as_str().to_string()),
        },
        State::Closed {
            session_id: None,
            reason,
        } => SessionStatus::Closed {
            reason: reason.as_str().to_string(),
            detail: close_detail(reason),
        },
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::AwaitingMicrophone => write!(f, "waiting for microphone"),
            SessionStatus::Streaming => write!(f, "streaming"),
            SessionStatus::ReceiveOnly { reason } => {
                write!(f, "receiving only (microphone unavailable: {})", reason)
            }
            SessionStatus::Closed {
                reason,
                detail: Some(detail),
            } => write!(f, "closed ({}: {})", reason, detail),
            SessionStatus::Closed { reason, .. } => write!(f, "closed ({})", reason),
        }
    }
}

/// Receives everything a front end shows. Called from the session loop, so
/// implementations must not block.
pub trait SessionObserver: Send + Sync + 'static {
    fn on_status(&self, status: &SessionStatus);

    /// A prompt/response pair completed. `display` is the deduplicated form.
    fn on_pair(&self, pair: &PromptResponsePair, display: &PromptResponsePair);

    fn on_error(&self, error: &SessionError);

    fn on_message(&self, _entry: &LogEntry) {}

    fn on_speed(&self, _speed: f32) {}

    fn on_log_cleared(&self) {}
}

/// Per-process session options
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub template_id: String,
    pub playback_speed: f32,
}

impl From<&settings::AppSettings> for SessionOptions {
    fn from(settings: &settings::AppSettings) -> Self {
        Self {
            template_id: settings.template_id.clone(),
            playback_speed: settings.playback_speed,
        }
    }
}

/// What the loop leaves behind when it exits
#[derive(Debug)]
pub struct SessionReport {
    pub final_state: State,
    pub pairs: Vec<PromptResponsePair>,
    pub messages: Vec<LogEntry>,
    pub metrics: MetricsSummary,
}

/// The session loop has exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopClosed;

impl std::fmt::Display for LoopClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session loop is not running")
    }
}

impl std::error::Error for LoopClosed {}

/// Sender side of the session loop
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionInput>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::Sender<SessionInput>) -> Self {
        Self { tx }
    }

    async fn send(&self, input: SessionInput) -> Result<(), LoopClosed> {
        self.tx.send(input).await.map_err(|_| LoopClosed)
    }

    /// Start a conversation, replacing any live one. A blank credential is
    /// rejected by the loop and reported as `SessionError::CredentialMissing`.
    pub async fn start(&self, credential: impl Into<String>) -> Result<(), LoopClosed> {
        self.send(SessionInput::Event(Event::Start {
            credential: credential.into(),
        }))
        .await
    }

    pub async fn stop(&self) -> Result<(), LoopClosed> {
        self.send(SessionInput::Event(Event::Stop)).await
    }

    /// Change the playback speed for audio scheduled from now on
    pub async fn set_speed(&self, speed: f32) -> Result<(), LoopClosed> {
        self.send(SessionInput::SetSpeed(speed)).await
    }

    pub async fn clear_log(&self) -> Result<(), LoopClosed> {
        self.send(SessionInput::ClearLog).await
    }

    pub async fn message_log(&self) -> Result<Vec<LogEntry>, LoopClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SessionInput::SnapshotLog(reply_tx)).await?;
        reply_rx.await.map_err(|_| LoopClosed)
    }

    /// Tear everything down and end the loop
    pub async fn exit(&self) -> Result<(), LoopClosed> {
        self.send(SessionInput::Event(Event::Exit)).await
    }
}

/// Spawn the session loop on the current runtime
pub fn spawn_session(
    backend: Arc<dyn SessionBackend>,
    observer: Arc<dyn SessionObserver>,
    options: SessionOptions,
) -> (SessionHandle, tokio::task::JoinHandle<SessionReport>) {
    let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
    let loop_tx = tx.downgrade();
    let task = tokio::spawn(async move {
        run_session_loop(rx, loop_tx, backend, observer, options).await
    });
    (SessionHandle::new(tx), task)
}

/// Mutable state owned by the loop
struct SessionLoop {
    state: State,
    resources: SessionResources,
    correlator: TranscriptCorrelator,
    message_log: MessageLog,
    metrics: MetricsCollector,
    playback_errors: u64,
    /// Handed to background work; weak so that dropping every handle ends the loop
    tx: mpsc::WeakSender<SessionInput>,
    backend: Arc<dyn SessionBackend>,
    observer: Arc<dyn SessionObserver>,
    options: SessionOptions,
}

/// Run the session loop until `Exit` or until every strong sender is dropped.
///
/// `tx` is the loop's own channel; background work reports back through it.
pub async fn run_session_loop(
    mut rx: mpsc::Receiver<SessionInput>,
    tx: mpsc::WeakSender<SessionInput>,
    backend: Arc<dyn SessionBackend>,
    observer: Arc<dyn SessionObserver>,
    options: SessionOptions,
) -> SessionReport {
    let mut session = SessionLoop {
        state: State::default(),
        resources: SessionResources::new(backend.output_factory(), options.playback_speed),
        correlator: TranscriptCorrelator::new(),
        message_log: MessageLog::new(),
        metrics: MetricsCollector::new(),
        playback_errors: 0,
        tx,
        backend,
        observer,
        options,
    };

    session.observer.on_status(&status_of(&session.state));
    log::info!("Session loop started");

    while let Some(input) = rx.recv().await {
        let event = match input {
            // Handle Exit at the edge
            SessionInput::Event(Event::Exit) => {
                log::info!("Exit requested, shutting down session loop");
                break;
            }
            SessionInput::Event(event) => event,
            SessionInput::Connected { id, link } => {
                if !session.state.is_connecting(id) {
                    log::debug!("Session {}: discarding connection for stale session", id);
                    link.close();
                    continue;
                }
                session.resources.attach_link(id, link);
                session.metrics.connected();
                Event::TransportOpened { id }
            }
            SessionInput::MicrophoneReady { id, mut capture } => {
                if !session.state.is_awaiting_microphone(id) {
                    log::debug!("Session {}: releasing microphone for stale session", id);
                    capture.disconnect();
                    capture.stop_tracks();
                    continue;
                }
                session.resources.attach_capture(capture);
                Event::MicrophoneGranted { id }
            }
            SessionInput::Inbound { id, message } => {
                session.handle_inbound(id, message);
                continue;
            }
            SessionInput::SetSpeed(speed) => {
                let applied = session.resources.scheduler.set_speed(speed);
                session.observer.on_speed(applied);
                continue;
            }
            SessionInput::ClearLog => {
                session.message_log.clear();
                session.observer.on_log_cleared();
                continue;
            }
            SessionInput::SnapshotLog(reply) => {
                let _ = reply.send(session.message_log.entries().to_vec());
                continue;
            }
        };

        match &event {
            // Keeps the credential out of the log
            Event::Start { .. } => log::debug!("Received event: Start"),
            other => log::debug!("Received event: {:?}", other),
        }
        session.dispatch(event);
    }

    let counters = session.resources.teardown();
    session.correlator.reset_pending();
    session.metrics.finish_session("exit", &counters);
    log::info!("Session loop ended");

    SessionReport {
        final_state: session.state,
        pairs: session.correlator.pairs().to_vec(),
        messages: session.message_log.entries().to_vec(),
        metrics: session.metrics.get_summary(),
    }
}

impl SessionLoop {
    fn dispatch(&mut self, event: Event) {
        let old_discriminant = std::mem::discriminant(&self.state);
        let (next, effects) = reduce(&self.state, event);
        if old_discriminant != std::mem::discriminant(&next) {
            log::info!("State transition: {:?} -> {:?}", self.state, next);
        }
        self.state = next;

        for effect in effects {
            self.run_effect(effect);
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Teardown => {
                let counters = self.resources.teardown();
                self.correlator.reset_pending();
                // Teardown also runs ahead of every Start. A live session ended
                // that way is recorded as "replaced"; with no current session
                // finish_session is a no-op.
                let reason = match &self.state {
                    State::Closed { reason, .. } => reason.as_str(),
                    _ => "replaced",
                };
                self.metrics.finish_session(reason, &counters);
            }
            Effect::OpenTransport { id, credential } => {
                let Some(tx) = self.tx.upgrade() else {
                    return;
                };
                self.metrics.start_session(id);
                self.backend.connect(id, credential, tx);
            }
            Effect::SendStartConversation { id } => {
                let Some(link) = self.resources.link_for(id) else {
                    log::warn!("Session {}: no connection to start the conversation on", id);
                    return;
                };
                match serde_json::to_string(&ClientMessage::start_conversation(
                    &self.options.template_id,
                )) {
                    Ok(json) => {
                        if link.send_text(json) {
                            log::info!("Session {}: StartConversation sent", id);
                        }
                    }
                    Err(e) => log::error!("Failed to serialize StartConversation: {}", e),
                }
            }
            Effect::RequestMicrophone { id } => {
                let Some(tx) = self.tx.upgrade() else {
                    return;
                };
                match self.resources.link_for(id) {
                    Some(link) => self.backend.acquire_microphone(id, link.audio_sender(), tx),
                    None => {
                        tokio::spawn(async move {
                            let _ = tx
                                .send(SessionInput::Event(Event::MicrophoneDenied {
                                    id,
                                    err: "connection is gone".to_string(),
                                }))
                                .await;
                        });
                    }
                }
            }
            Effect::ReportError(err) => {
                if err.is_fatal() {
                    log::error!("Session error: {}", err);
                } else {
                    log::warn!("Session error: {}", err);
                }
                let category = match &err {
                    SessionError::CredentialMissing => "credential",
                    SessionError::ConnectionError(_) => "connection",
                    SessionError::MicrophoneError(_) => "microphone",
                    SessionError::DecodeError(_) => "decode",
                    SessionError::Underrun { .. } => "playback",
                };
                self.metrics.record_error(category, err.to_string());
                self.observer.on_error(&err);
            }
            Effect::EmitStatus => self.observer.on_status(&status_of(&self.state)),
        }
    }

    fn handle_inbound(&mut self, id: Uuid, message: InboundMessage) {
        if self.resources.link_for(id).is_none() {
            log::debug!("Session {}: dropping message for a released connection", id);
            return;
        }

        match message {
            InboundMessage::Binary(bytes) => {
                let entry = self.message_log.push(LogEntry::binary(&bytes));
                self.observer.on_message(entry);
                self.play(&bytes);
            }
            InboundMessage::Text(text) => match decode_text(&text) {
                Ok(inbound) => {
                    let entry = self.message_log.push(LogEntry::structured(&text));
                    self.observer.on_message(entry);
                    log_server_message(&inbound);
                    self.correlate(inbound);
                }
                Err(e) => {
                    let err = SessionError::DecodeError(e.to_string());
                    log::debug!("Session {}: {}", id, err);
                    self.metrics.decode_error();
                }
            },
        }
    }

    fn play(&mut self, bytes: &[u8]) {
        match self.resources.scheduler.on_frame(bytes) {
            Ok(_) => {}
            Err(PlaybackError::Codec(e)) => {
                log::debug!("Dropping inbound audio frame: {}", e);
            }
            Err(e) => {
                self.playback_errors += 1;
                if self.playback_errors % 50 == 1 {
                    log::warn!(
                        "Playback unavailable ({} frames lost): {}",
                        self.playback_errors,
                        e
                    );
                    self.metrics.record_error("playback", e.to_string());
                }
            }
        }
    }

    fn correlate(&mut self, inbound: InboundText) {
        if let Some(pair) = self.correlator.on_event(inbound.into()) {
            self.metrics.pair_emitted();
            let index = self.correlator.pairs().len() - 1;
            let display = self
                .correlator
                .display_pair(index)
                .unwrap_or_else(|| pair.clone());
            self.observer.on_pair(&pair, &display);
        }
    }
}

fn log_server_message(inbound: &InboundText) {
    match &inbound.message {
        ServerMessage::Warning {
            warning_type,
            reason,
        } => log::warn!("Flow warning ({}): {}", warning_type, reason),
        ServerMessage::Error { error_type, reason } => {
            log::warn!("Flow error ({}): {}", error_type, reason)
        }
        ServerMessage::Info { info_type, reason } => {
            log::info!("Flow info ({}): {}", info_type, reason)
        }
        ServerMessage::ConversationStarted { id } => {
            log::info!("Conversation started: {:?}", id)
        }
        ServerMessage::ConversationEnding | ServerMessage::ConversationEnded => {
            log::info!("Conversation {:?}", inbound.tag())
        }
        ServerMessage::AddTranscript { metadata } => {
            log::debug!("Transcript: {}", metadata.transcript)
        }
        ServerMessage::Unknown => {
            log::debug!("Unrecognised message: {:?}", inbound.tag())
        }
        _ => log::trace!("Flow message: {:?}", inbound.tag()),
    }
}
