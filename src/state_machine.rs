//! State machine for a Flow conversation session
//!
//! This module implements the session lifecycle using a single-writer pattern.
//! All state transitions go through the `reduce()` function, which returns
//! a new state and a list of effects to execute.
//!
//! ```text
//! Idle ──start──▶ Connecting ──opened──▶ AwaitingMicrophone ──granted──▶ Streaming
//!                     │                        │                            │
//!                     └── failed ──┐           └── denied ──▶ Closed(mic)   │
//!                                  ▼                 (still receiving)      │
//!                               Closed ◀──── close / error / stop ──────────┘
//! ```

use uuid::Uuid;

/// Errors surfaced by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// No credential was supplied; nothing was sent over the network
    CredentialMissing,
    /// The connection could not be established or was lost
    ConnectionError(String),
    /// The microphone could not be acquired
    MicrophoneError(String),
    /// An inbound message could not be decoded and was dropped
    DecodeError(String),
    /// Playback fell behind the output clock and was resynchronised
    Underrun { behind_secs: f64 },
}

impl SessionError {
    /// Fatal errors end (or abort) the session or its capture and are shown
    /// to the user; the others are absorbed locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::CredentialMissing
                | SessionError::ConnectionError(_)
                | SessionError::MicrophoneError(_)
        )
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::CredentialMissing => {
                write!(f, "No credential provided. Pass --token or set FLOW_TOKEN.")
            }
            SessionError::ConnectionError(e) => write!(f, "Connection error: {}", e),
            SessionError::MicrophoneError(e) => write!(f, "Microphone error: {}", e),
            SessionError::DecodeError(e) => write!(f, "Failed to decode message: {}", e),
            SessionError::Underrun { behind_secs } => {
                write!(f, "Playback underrun ({:.3}s behind)", behind_secs)
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Why a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    Stopped,
    CredentialMissing,
    ConnectionFailed(String),
    ConnectionLost(String),
    RemoteClosed(Option<String>),
    MicrophoneError(String),
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Stopped => "stopped",
            CloseReason::CredentialMissing => "credential_missing",
            CloseReason::ConnectionFailed(_) => "connection_failed",
            CloseReason::ConnectionLost(_) => "connection_lost",
            CloseReason::RemoteClosed(_) => "remote_closed",
            CloseReason::MicrophoneError(_) => "microphone_error",
        }
    }
}

/// Internal state of the session.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum State {
    #[default]
    Idle,
    Connecting {
        session_id: Uuid,
    },
    AwaitingMicrophone {
        session_id: Uuid,
    },
    Streaming {
        session_id: Uuid,
    },
    /// `session_id` is kept while the connection is still up without capture
    Closed {
        session_id: Option<Uuid>,
        reason: CloseReason,
    },
}

impl State {
    /// The id of the session that currently owns resources, if any
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            State::Idle => None,
            State::Connecting { session_id }
            | State::AwaitingMicrophone { session_id }
            | State::Streaming { session_id } => Some(*session_id),
            State::Closed { session_id, .. } => *session_id,
        }
    }

    pub fn is_connecting(&self, id: Uuid) -> bool {
        matches!(self, State::Connecting { session_id } if *session_id == id)
    }

    pub fn is_awaiting_microphone(&self, id: Uuid) -> bool {
        matches!(self, State::AwaitingMicrophone { session_id } if *session_id == id)
    }
}

/// Events that can trigger state transitions.
/// These are sent from the user, the transport and the microphone.
#[derive(Debug, Clone)]
pub enum Event {
    /// User asked to start a conversation
    Start {
        credential: String,
    },
    /// User asked to stop
    Stop,
    /// Application exit requested
    Exit,

    // Transport events
    TransportOpened {
        id: Uuid,
    },
    TransportFailed {
        id: Uuid,
        err: String,
    },
    TransportClosed {
        id: Uuid,
        reason: Option<String>,
    },
    TransportError {
        id: Uuid,
        err: String,
    },

    // Microphone events
    MicrophoneGranted {
        id: Uuid,
    },
    MicrophoneDenied {
        id: Uuid,
        err: String,
    },
}

/// Effects to be executed after a state transition.
/// The session loop handles these in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Release every session resource (idempotent)
    Teardown,
    OpenTransport {
        id: Uuid,
        credential: String,
    },
    SendStartConversation {
        id: Uuid,
    },
    RequestMicrophone {
        id: Uuid,
    },
    ReportError(SessionError),
    /// Signal to emit the status to the observer
    EmitStatus,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale session IDs
/// - Always emit EmitStatus after state changes
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    let current_id = state.session_id();

    // Helper: check if event's ID belongs to the live session
    let is_current = |eid: Uuid| current_id == Some(eid);

    match (state, event) {
        // -----------------
        // Start (from any state)
        // -----------------
        (_, Start { credential }) if credential.trim().is_empty() => {
            // Rejected before any network call. A live session is left alone.
            if current_id.is_some() {
                return (state.clone(), vec![ReportError(SessionError::CredentialMissing)]);
            }
            (
                Closed {
                    session_id: None,
                    reason: CloseReason::CredentialMissing,
                },
                vec![ReportError(SessionError::CredentialMissing), EmitStatus],
            )
        }
        (_, Start { credential }) => {
            let id = Uuid::new_v4();
            (
                Connecting { session_id: id },
                vec![Teardown, OpenTransport { id, credential }, EmitStatus],
            )
        }

        // -----------------
        // Stop (always safe)
        // -----------------
        (Idle, Stop) => (Idle, vec![]),
        (
            Closed {
                session_id: None, ..
            },
            Stop,
        ) => (state.clone(), vec![Teardown]),
        (_, Stop) => (
            Closed {
                session_id: None,
                reason: CloseReason::Stopped,
            },
            vec![Teardown, EmitStatus],
        ),

        // -----------------
        // Connecting
        // -----------------
        (Connecting { session_id }, TransportOpened { id }) if *session_id == id => (
            AwaitingMicrophone { session_id: id },
            vec![
                SendStartConversation { id },
                RequestMicrophone { id },
                EmitStatus,
            ],
        ),
        (Connecting { session_id }, TransportFailed { id, err }) if *session_id == id => (
            Closed {
                session_id: None,
                reason: CloseReason::ConnectionFailed(err.clone()),
            },
            vec![
                Teardown,
                ReportError(SessionError::ConnectionError(err)),
                EmitStatus,
            ],
        ),

        // -----------------
        // AwaitingMicrophone
        // -----------------
        (AwaitingMicrophone { session_id }, MicrophoneGranted { id }) if *session_id == id => {
            (Streaming { session_id: id }, vec![EmitStatus])
        }
        // Capture is unavailable but the connection stays up and keeps receiving
        (AwaitingMicrophone { session_id }, MicrophoneDenied { id, err }) if *session_id == id => (
            Closed {
                session_id: Some(id),
                reason: CloseReason::MicrophoneError(err.clone()),
            },
            vec![ReportError(SessionError::MicrophoneError(err)), EmitStatus],
        ),

        // -----------------
        // Connection ended (any state holding a connection)
        // -----------------
        // Already closed for another reason: keep it, just release the connection
        (
            Closed {
                session_id: Some(sid),
                reason,
            },
            TransportClosed { id, .. } | TransportError { id, .. },
        ) if *sid == id => (
            Closed {
                session_id: None,
                reason: reason.clone(),
            },
            vec![Teardown, EmitStatus],
        ),
        (_, TransportClosed { id, reason }) if is_current(id) => (
            Closed {
                session_id: None,
                reason: CloseReason::RemoteClosed(reason),
            },
            vec![Teardown, EmitStatus],
        ),
        (_, TransportError { id, err }) if is_current(id) => (
            Closed {
                session_id: None,
                reason: CloseReason::ConnectionLost(err.clone()),
            },
            vec![
                Teardown,
                ReportError(SessionError::ConnectionError(err)),
                EmitStatus,
            ],
        ),

        // -----------------
        // Exit is handled by the session loop before it reaches the reducer
        // -----------------
        (_, Exit) => (state.clone(), vec![]),

        // -----------------
        // Stale or unexpected events: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}
