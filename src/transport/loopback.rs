//! In-process transport pair.
//!
//! [`pair`] returns a [`LoopbackFactory`] to hand to the client and a
//! [`LoopbackServer`] that plays the remote end. Every transport the factory
//! opens shows up on the server as a [`LoopbackPeer`], which decides when the
//! transport opens, what it receives, and when it closes.
//!
//! # Example
//!
//! ```ignore
//! let (factory, mut server) = loopback::pair();
//! let client = SubscriptionClient::builder().transport(factory).build()?;
//!
//! client.subscribe("ws://local/graphql", "subscription{m{id}}", json!({}), 0, |_| {});
//!
//! let mut peer = server.accept().await.unwrap();
//! peer.open();
//! assert_eq!(peer.recv_json().await.unwrap()["type"], "connection_init");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};

use super::{EventSink, ReadyState, Transport, TransportEvent, TransportFactory};

// ============================================================================
// Constructor
// ============================================================================

/// Creates a connected factory/server pair.
#[must_use]
pub fn pair() -> (LoopbackFactory, LoopbackServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (LoopbackFactory { accept_tx }, LoopbackServer { accept_rx })
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared by both ends of one loopback transport.
#[derive(Debug)]
struct Shared {
    url: String,
    state: Mutex<ReadyState>,
    sink: EventSink,
}

impl Shared {
    /// Moves to `Closed` and emits `Close`, once.
    fn close(&self, code: Option<u16>, reason: &str) {
        {
            let mut state = self.state.lock();
            if *state == ReadyState::Closed {
                return;
            }
            *state = ReadyState::Closed;
        }
        self.sink.emit(TransportEvent::Close {
            code,
            reason: reason.to_owned(),
        });
    }
}

// ============================================================================
// LoopbackFactory
// ============================================================================

/// Client half: a [`TransportFactory`] whose transports end at a [`LoopbackServer`].
#[derive(Debug, Clone)]
pub struct LoopbackFactory {
    accept_tx: mpsc::UnboundedSender<LoopbackPeer>,
}

impl TransportFactory for LoopbackFactory {
    fn open(&self, url: &str, sink: EventSink) -> Result<Box<dyn Transport>> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            url: url.to_owned(),
            state: Mutex::new(ReadyState::Connecting),
            sink,
        });

        let peer = LoopbackPeer {
            shared: Arc::clone(&shared),
            outbound_rx,
        };

        self.accept_tx
            .send(peer)
            .map_err(|_| Error::connection("loopback server dropped"))?;

        debug!(url, "Loopback transport opened");

        Ok(Box::new(LoopbackTransport {
            shared,
            outbound_tx,
        }))
    }
}

// ============================================================================
// LoopbackTransport
// ============================================================================

/// Client-side handle.
#[derive(Debug)]
struct LoopbackTransport {
    shared: Arc<Shared>,
    outbound_tx: mpsc::UnboundedSender<String>,
}

impl Transport for LoopbackTransport {
    fn ready_state(&self) -> ReadyState {
        *self.shared.state.lock()
    }

    fn send(&self, frame: String) -> Result<()> {
        if self.ready_state() != ReadyState::Open {
            return Err(Error::socket_unavailable(frame));
        }

        self.outbound_tx
            .send(frame)
            .map_err(|e| Error::socket_unavailable(e.0))
    }

    fn close(&self) {
        self.shared.close(Some(1000), "client close");
    }
}

// ============================================================================
// LoopbackServer
// ============================================================================

/// Remote half: yields one [`LoopbackPeer`] per opened transport.
#[derive(Debug)]
pub struct LoopbackServer {
    accept_rx: mpsc::UnboundedReceiver<LoopbackPeer>,
}

impl LoopbackServer {
    /// Waits for the next transport to be opened.
    ///
    /// Returns `None` once every factory clone is dropped.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.accept_rx.recv().await
    }

    /// Returns the next opened transport without waiting.
    pub fn try_accept(&mut self) -> Option<LoopbackPeer> {
        self.accept_rx.try_recv().ok()
    }
}

// ============================================================================
// LoopbackPeer
// ============================================================================

/// Remote end of one loopback transport.
#[derive(Debug)]
pub struct LoopbackPeer {
    shared: Arc<Shared>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

impl LoopbackPeer {
    /// URL the client opened.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Current readiness as seen by the client.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        *self.shared.state.lock()
    }

    /// Completes the connection.
    pub fn open(&self) {
        *self.shared.state.lock() = ReadyState::Open;
        self.shared.sink.emit(TransportEvent::Open);
    }

    /// Delivers a text frame to the client.
    pub fn send(&self, frame: impl Into<String>) {
        self.shared.sink.emit(TransportEvent::Message(frame.into()));
    }

    /// Delivers a JSON frame to the client.
    pub fn send_json(&self, value: &Value) {
        self.send(value.to_string());
    }

    /// Reports a transport error to the client without closing.
    pub fn fail(&self, message: impl Into<String>) {
        self.shared.sink.emit(TransportEvent::Error(message.into()));
    }

    /// Closes from the server side.
    pub fn close(&self, code: u16, reason: &str) {
        self.shared.close(Some(code), reason);
    }

    /// Waits for the next frame sent by the client.
    ///
    /// Returns `None` once the client handle is dropped and drained.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound_rx.recv().await
    }

    /// Waits for the next frame and parses it as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let frame = self.recv().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Returns the next frame without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.outbound_rx.try_recv().ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
