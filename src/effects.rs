//! Effect execution for conversation sessions
//!
//! The state machine decides *what* happens; this module does it. Slow work
//! (connecting, opening the microphone) runs on background tasks that report
//! back into the session loop as [`SessionInput`]s, tagged with the session
//! id so the loop can discard results for sessions that are already gone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::audio::{CaptureControl, CaptureEngine};
use crate::metrics::TeardownCounters;
use crate::playback::{DeviceOutputFactory, OutputFactory, PlaybackScheduler};
use crate::settings::AppSettings;
use crate::state_machine::Event;
use crate::streaming::{self, AudioSender, InboundMessage, LinkEvent, LogEntry, TransportLink};

/// Everything the session loop consumes, in one ordered stream
pub enum SessionInput {
    /// A state machine event
    Event(Event),
    /// The connection for session `id` is open
    Connected { id: Uuid, link: TransportLink },
    /// The microphone for session `id` is capturing
    MicrophoneReady {
        id: Uuid,
        capture: Box<dyn CaptureControl>,
    },
    /// A message arrived on the connection of session `id`
    Inbound { id: Uuid, message: InboundMessage },
    SetSpeed(f32),
    ClearLog,
    /// Reply with a copy of the message log
    SnapshotLog(oneshot::Sender<Vec<LogEntry>>),
}

impl std::fmt::Debug for SessionInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionInput::Event(e) => f.debug_tuple("Event").field(e).finish(),
            SessionInput::Connected { id, .. } => {
                f.debug_struct("Connected").field("id", id).finish()
            }
            SessionInput::MicrophoneReady { id, .. } => {
                f.debug_struct("MicrophoneReady").field("id", id).finish()
            }
            SessionInput::Inbound { id, message } => f
                .debug_struct("Inbound")
                .field("id", id)
                .field("message", message)
                .finish(),
            SessionInput::SetSpeed(s) => f.debug_tuple("SetSpeed").field(s).finish(),
            SessionInput::ClearLog => write!(f, "ClearLog"),
            SessionInput::SnapshotLog(_) => write!(f, "SnapshotLog"),
        }
    }
}

/// Provider of the network connection, the microphone and the speakers.
///
/// `connect` must eventually send either `Connected` or
/// `Event::TransportFailed`. After `Connected`, inbound traffic follows as
/// `Inbound` and the connection's end as `Event::TransportClosed` or
/// `Event::TransportError`. `acquire_microphone` must eventually send either
/// `MicrophoneReady` or `Event::MicrophoneDenied`.
pub trait SessionBackend: Send + Sync + 'static {
    fn connect(&self, id: Uuid, credential: String, tx: mpsc::Sender<SessionInput>);
    fn acquire_microphone(&self, id: Uuid, sink: AudioSender, tx: mpsc::Sender<SessionInput>);
    fn output_factory(&self) -> Arc<dyn OutputFactory>;
}

/// Real backend: Flow over WebSocket, CPAL microphone and speakers.
pub struct LiveBackend {
    endpoint: String,
    template_id: String,
    connect_timeout: Duration,
    outbound_queue_frames: usize,
}

impl LiveBackend {
    pub fn new(settings: &AppSettings) -> Arc<Self> {
        Arc::new(Self {
            endpoint: settings.endpoint.clone(),
            template_id: settings.template_id.clone(),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs.max(1)),
            outbound_queue_frames: settings.outbound_queue_frames.max(1),
        })
    }
}

impl SessionBackend for LiveBackend {
    fn connect(&self, id: Uuid, credential: String, tx: mpsc::Sender<SessionInput>) {
        let endpoint = self.endpoint.clone();
        let template_id = self.template_id.clone();
        let connect_timeout = self.connect_timeout;
        let queue_frames = self.outbound_queue_frames;

        tokio::spawn(async move {
            let connected = match streaming::endpoint_url(&endpoint, &credential, &template_id) {
                Ok(url) => streaming::connect(url.as_str(), connect_timeout, queue_frames).await,
                Err(e) => Err(e),
            };

            let (link, mut events) = match connected {
                Ok(connected) => connected,
                Err(e) => {
                    log::error!("Session {}: connection failed: {}", id, e);
                    let _ = tx
                        .send(SessionInput::Event(Event::TransportFailed {
                            id,
                            err: e.to_string(),
                        }))
                        .await;
                    return;
                }
            };

            if tx.send(SessionInput::Connected { id, link }).await.is_err() {
                log::debug!("Session {}: loop gone before connection was handed over", id);
                return;
            }

            while let Some(event) = events.recv().await {
                let input = match event {
                    LinkEvent::Message(message) => SessionInput::Inbound { id, message },
                    LinkEvent::Closed(reason) => {
                        SessionInput::Event(Event::TransportClosed { id, reason })
                    }
                    LinkEvent::Error(err) => SessionInput::Event(Event::TransportError { id, err }),
                };
                if tx.send(input).await.is_err() {
                    break;
                }
            }
            log::debug!("Session {}: link forwarder exiting", id);
        });
    }

    fn acquire_microphone(&self, id: Uuid, sink: AudioSender, tx: mpsc::Sender<SessionInput>) {
        tokio::spawn(async move {
            // CaptureEngine::start blocks until the device is running
            let started =
                tokio::task::spawn_blocking(move || CaptureEngine::start(Arc::new(sink))).await;

            let input = match started {
                Ok(Ok(handle)) => SessionInput::MicrophoneReady {
                    id,
                    capture: Box::new(handle),
                },
                Ok(Err(e)) => {
                    log::error!("Session {}: microphone unavailable: {}", id, e);
                    SessionInput::Event(Event::MicrophoneDenied {
                        id,
                        err: e.to_string(),
                    })
                }
                Err(e) => SessionInput::Event(Event::MicrophoneDenied {
                    id,
                    err: format!("capture task failed: {}", e),
                }),
            };
            let _ = tx.send(input).await;
        });
    }

    fn output_factory(&self) -> Arc<dyn OutputFactory> {
        Arc::new(DeviceOutputFactory)
    }
}

/// Resources held by the live session
pub struct SessionResources {
    link: Option<(Uuid, TransportLink)>,
    capture: Option<Box<dyn CaptureControl>>,
    pub scheduler: PlaybackScheduler,
}

impl SessionResources {
    pub fn new(output_factory: Arc<dyn OutputFactory>, initial_speed: f32) -> Self {
        Self {
            link: None,
            capture: None,
            scheduler: PlaybackScheduler::new(output_factory, initial_speed),
        }
    }

    pub fn attach_link(&mut self, id: Uuid, link: TransportLink) {
        if let Some((old_id, old)) = self.link.replace((id, link)) {
            log::warn!("Session {}: replacing a connection that was still attached", old_id);
            old.close();
        }
    }

    pub fn attach_capture(&mut self, capture: Box<dyn CaptureControl>) {
        if let Some(mut old) = self.capture.replace(capture) {
            old.disconnect();
            old.stop_tracks();
        }
    }

    /// The attached connection, if it belongs to session `id`
    pub fn link_for(&self, id: Uuid) -> Option<&TransportLink> {
        match &self.link {
            Some((link_id, link)) if *link_id == id => Some(link),
            _ => None,
        }
    }

    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    /// Release everything: capture graph, input device, audio output,
    /// connection, playback cursor. Each step is skipped if already done, so
    /// calling this repeatedly is safe.
    pub fn teardown(&mut self) -> TeardownCounters {
        if let Some(mut capture) = self.capture.take() {
            capture.disconnect();
            capture.stop_tracks();
        }

        let playback = self.scheduler.release();

        let mut counters = TeardownCounters {
            playback,
            ..TeardownCounters::default()
        };

        if let Some((id, link)) = self.link.take() {
            counters.frames_sent = link.counters().frames_sent();
            counters.frames_dropped = link.counters().frames_dropped();
            if link.is_open() {
                link.close();
            }
            log::info!("Session {}: resources released", id);
        }

        counters
    }
}
