//! Conversation transport for the Flow service
//!
//! This module provides the WebSocket link to Flow and the pieces that make
//! sense of what comes back over it.
//!
//! # Architecture
//!
//! ```text
//! AudioSender ──▶ TransportLink (writer task) ──▶ Flow
//!                                                  │
//!                                                  ▼
//!                               reader task ──▶ LinkEvent
//!                                                  │
//!                     ┌────────────────────────────┴───────────┐
//!                     ▼                                        ▼
//!              binary: playback                   text: MessageLog +
//!                                                 TranscriptCorrelator
//! ```
//!
//! # Failure Strategy
//!
//! - The initial connection is a single attempt bounded by a timeout
//! - A closed or failed connection ends the session (no reconnection)

mod connection;
mod message_log;
pub mod protocol;
mod transcript_correlator;

pub use connection::{
    connect, AudioSender, InboundMessage, LinkCounters, LinkEvent, LinkPeer, Outbound,
    TransportLink,
};
pub use message_log::{LogBody, LogEntry, MessageLog, BINARY_PREVIEW_BYTES};
pub use protocol::{decode_text, ClientMessage, InboundText, ServerMessage};
pub use transcript_correlator::{PromptResponsePair, TranscriptCorrelator, TranscriptEvent};

use reqwest::Url;

/// Errors that can occur on the conversation transport
#[derive(Debug, Clone)]
pub enum TransportError {
    /// Endpoint or query parameters do not form a valid URL
    InvalidEndpoint(String),
    /// Failed to establish the WebSocket connection
    ConnectionFailed(String),
    /// The handshake did not finish in time
    Timeout(std::time::Duration),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::InvalidEndpoint(e) => write!(f, "Invalid Flow endpoint: {}", e),
            TransportError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to Flow service: {}", e)
            }
            TransportError::Timeout(d) => {
                write!(f, "Connection to Flow service timed out after {:?}", d)
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Build the session URL: `<endpoint>?jwt=<token>&assistant=<template_id>`
pub fn endpoint_url(endpoint: &str, token: &str, template_id: &str) -> Result<Url, TransportError> {
    Url::parse_with_params(endpoint, &[("jwt", token), ("assistant", template_id)])
        .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))
}
