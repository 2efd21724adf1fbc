//! Flow WebSocket connection
//!
//! Manages one duplex connection to the Flow service.
//!
//! # Connection Flow
//!
//! 1. `connect()` - Establish WebSocket (single attempt, bounded by a timeout)
//! 2. `TransportLink::send_text()` / `AudioSender` - queue outbound messages
//! 3. `LinkEvent` receiver - inbound messages, then exactly one close/error
//! 4. `TransportLink::close()` - shutdown, safe to call repeatedly
//!
//! There are no retries: a failed or dropped connection ends the session.
//!
//! Outbound audio is never queued behind a closed or saturated connection.
//! Frames offered while the link is closed, or while the bounded writer queue
//! is full, are dropped and counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use super::TransportError;
use crate::audio::FrameSink;

/// Capacity of the link event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

static CRYPTO_PROVIDER: once_cell::sync::OnceCell<()> = once_cell::sync::OnceCell::new();

/// Install the ring crypto provider for rustls, once per process
fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.get_or_init(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            log::debug!("rustls crypto provider already installed");
        }
    });
}

/// Queued outbound traffic for the writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// A message received from the service
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// What the reader task observes, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message(InboundMessage),
    /// The service closed the connection (with the close reason, if any)
    Closed(Option<String>),
    /// The connection failed
    Error(String),
}

/// Outbound counters shared by the link and its audio senders
#[derive(Debug, Default)]
pub struct LinkCounters {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl LinkCounters {
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

/// Handle to a live connection
///
/// Dropping the handle closes the connection.
pub struct TransportLink {
    outbound_tx: mpsc::Sender<Outbound>,
    open: Arc<AtomicBool>,
    counters: Arc<LinkCounters>,
    cancel: CancellationToken,
}

impl TransportLink {
    fn new(outbound_tx: mpsc::Sender<Outbound>, cancel: CancellationToken) -> Self {
        Self {
            outbound_tx,
            open: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(LinkCounters::default()),
            cancel,
        }
    }

    /// A link with no network behind it.
    ///
    /// Everything sent on the link arrives on the returned [`LinkPeer`], which
    /// can also mark the link as closed from the far side.
    pub fn pair(queue_frames: usize) -> (Self, LinkPeer) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_frames.max(1));
        let link = Self::new(outbound_tx, CancellationToken::new());
        let peer = LinkPeer {
            outbound_rx,
            open: link.open.clone(),
        };
        (link, peer)
    }

    /// Whether the connection is open for sending
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue a text message. Returns false if it was not queued.
    pub fn send_text(&self, text: String) -> bool {
        if !self.is_open() {
            log::debug!("TransportLink: dropping text message, connection not open");
            return false;
        }
        match self.outbound_tx.try_send(Outbound::Text(text)) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("TransportLink: failed to queue text message: {}", e);
                false
            }
        }
    }

    /// Sender for the capture path, bound to this link's open flag
    pub fn audio_sender(&self) -> AudioSender {
        AudioSender {
            outbound_tx: self.outbound_tx.clone(),
            open: self.open.clone(),
            counters: self.counters.clone(),
        }
    }

    pub fn counters(&self) -> &LinkCounters {
        &self.counters
    }

    /// Close the connection. Safe to call repeatedly.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("TransportLink: closing connection");
        // A full queue means the writer is stuck behind audio; cut it off
        if self.outbound_tx.try_send(Outbound::Close).is_err() {
            self.cancel.cancel();
        }
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// The far side of a [`TransportLink::pair`]
pub struct LinkPeer {
    outbound_rx: mpsc::Receiver<Outbound>,
    open: Arc<AtomicBool>,
}

impl LinkPeer {
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.outbound_rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.outbound_rx.try_recv().ok()
    }

    /// Mark the link closed, as the reader task does when the service hangs up
    pub fn hang_up(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Sends captured frames over a link without ever blocking the audio thread.
#[derive(Clone)]
pub struct AudioSender {
    outbound_tx: mpsc::Sender<Outbound>,
    open: Arc<AtomicBool>,
    counters: Arc<LinkCounters>,
}

impl AudioSender {
    /// Offer one frame. Returns true if it was queued for sending.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        if !self.open.load(Ordering::Relaxed) {
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.outbound_tx.try_send(Outbound::Binary(frame)) {
            Ok(()) => {
                let sent = self.counters.frames_sent.fetch_add(1, Ordering::Relaxed) + 1;
                if sent % 100 == 0 {
                    log::debug!("AudioSender: {} frames queued", sent);
                }
                true
            }
            Err(_) => {
                let dropped = self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 50 == 1 {
                    log::warn!("AudioSender: outbound queue full, {} frames dropped", dropped);
                }
                false
            }
        }
    }
}

impl FrameSink for AudioSender {
    fn send_frame(&self, frame: Vec<u8>) {
        self.send(frame);
    }
}

/// Open a connection to `url`.
///
/// Returns the link and the channel of [`LinkEvent`]s. The event channel
/// ends after a `Closed` or `Error` event, or once the link is closed
/// locally.
pub async fn connect(
    url: &str,
    connect_timeout: Duration,
    queue_frames: usize,
) -> Result<(TransportLink, mpsc::Receiver<LinkEvent>), TransportError> {
    ensure_crypto_provider();

    log::info!("Connecting to Flow service...");

    let (ws_stream, _response) = timeout(
        connect_timeout,
        connect_async_with_config(url, None, true),
    )
    .await
    .map_err(|_| TransportError::Timeout(connect_timeout))?
    .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    log::info!("WebSocket connected");

    let (mut write, mut read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(queue_frames.max(1));
    let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let link = TransportLink::new(outbound_tx, cancel.clone());

    // Writer: drains the outbound queue in order
    let writer_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = writer_cancel.cancelled() => break,
                next = outbound_rx.recv() => next,
            };
            let result = match next {
                Some(Outbound::Text(text)) => write.send(Message::Text(text)).await,
                Some(Outbound::Binary(bytes)) => write.send(Message::Binary(bytes)).await,
                Some(Outbound::Close) | None => {
                    if let Err(e) = write.close().await {
                        log::debug!("Error closing WebSocket: {}", e);
                    }
                    break;
                }
            };
            if let Err(e) = result {
                log::warn!("WebSocket send failed: {}", e);
                break;
            }
        }
        writer_cancel.cancel();
        log::debug!("Writer task exiting");
    });

    // Reader: forwards inbound traffic and reports how the connection ended
    let open = link.open.clone();
    tokio::spawn(async move {
        let ending = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break None,
                next = read.next() => next,
            };
            let event = match next {
                Some(Ok(Message::Text(text))) => LinkEvent::Message(InboundMessage::Text(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    LinkEvent::Message(InboundMessage::Binary(bytes))
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    log::info!("WebSocket closed by server: {:?}", reason);
                    break Some(LinkEvent::Closed(reason));
                }
                Some(Ok(_)) => continue, // ping/pong/frame
                Some(Err(e)) => {
                    log::warn!("WebSocket error: {}", e);
                    break Some(LinkEvent::Error(e.to_string()));
                }
                None => break Some(LinkEvent::Closed(None)),
            };
            if event_tx.send(event).await.is_err() {
                log::debug!("Link event channel closed");
                break None;
            }
        };

        open.store(false, Ordering::SeqCst);
        cancel.cancel();
        if let Some(event) = ending {
            let _ = event_tx.send(event).await;
        }
        log::debug!("Reader task exiting");
    });

    Ok((link, event_rx))
}
