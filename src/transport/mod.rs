//! Transport primitive.
//!
//! The engine never touches sockets directly. It drives a [`Transport`]
//! handle created by a [`TransportFactory`] and receives that transport's
//! events through an [`EventSink`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   open(url, sink)   ┌──────────────────┐
//! │                  │────────────────────►│ TransportFactory │
//! │  Subscription    │                     └────────┬─────────┘
//! │  event loop      │   send / close               │ creates
//! │                  │────────────────────►┌────────▼─────────┐
//! │                  │◄────────────────────│    Transport     │
//! └──────────────────┘   TransportEvent    └──────────────────┘
//!                        (via EventSink)
//! ```
//!
//! # Transport Lifecycle
//!
//! 1. `TransportFactory::open` - returns a handle in [`ReadyState::Connecting`]
//! 2. [`TransportEvent::Open`] - handle is now [`ReadyState::Open`]
//! 3. [`TransportEvent::Message`] - zero or more text frames
//! 4. [`TransportEvent::Close`] - handle is [`ReadyState::Closed`]; no further events
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `loopback` | In-process transport pair |
//! | `websocket` | tokio-tungstenite transport (feature `websocket`) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// In-process transport pair for embedding and tests.
pub mod loopback;

/// WebSocket transport backed by tokio-tungstenite.
#[cfg(feature = "websocket")]
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use loopback::{LoopbackFactory, LoopbackPeer, LoopbackServer};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketFactory, WebSocketTransport};

// ============================================================================
// ReadyState
// ============================================================================

/// Readiness of a transport handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// Connection is being established.
    Connecting,
    /// Frames can be sent.
    Open,
    /// Close has been requested.
    Closing,
    /// Connection is gone.
    Closed,
}

impl ReadyState {
    /// Returns `true` if frames can no longer be sent.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Event emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established.
    Open,
    /// Text frame received.
    Message(String),
    /// Transport-level failure. A `Close` usually follows.
    Error(String),
    /// Connection closed.
    Close {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason (may be empty).
        reason: String,
    },
}

// ============================================================================
// EventSink
// ============================================================================

/// Receives events from one transport handle.
///
/// Cheap to clone; emitting never blocks.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    /// Creates a sink from a callback.
    pub fn new(callback: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(callback),
        }
    }

    /// Delivers an event.
    #[inline]
    pub fn emit(&self, event: TransportEvent) {
        (self.inner)(event);
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

// ============================================================================
// Transport
// ============================================================================

/// A bidirectional text-frame channel.
///
/// Exclusively owned by one connection; never shared.
pub trait Transport: Send + Sync {
    /// Returns the current readiness.
    fn ready_state(&self) -> ReadyState;

    /// Sends a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketUnavailable`](crate::Error::SocketUnavailable)
    /// if the transport is not open.
    fn send(&self, frame: String) -> Result<()>;

    /// Requests close. A [`TransportEvent::Close`] follows.
    fn close(&self);
}

// ============================================================================
// TransportFactory
// ============================================================================

/// Creates transport handles.
///
/// Supplied through [`ClientBuilder::transport`](crate::ClientBuilder::transport)
/// to replace the default WebSocket transport.
pub trait TransportFactory: Send + Sync {
    /// Opens a transport to `url`. Events are delivered to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is unusable or the transport cannot be
    /// created at all. Connection failures after this call are reported as
    /// events instead.
    fn open(&self, url: &str, sink: EventSink) -> Result<Box<dyn Transport>>;
}

impl<F> TransportFactory for F
where
    F: Fn(&str, EventSink) -> Result<Box<dyn Transport>> + Send + Sync,
{
    fn open(&self, url: &str, sink: EventSink) -> Result<Box<dyn Transport>> {
        self(url, sink)
    }
}

/// Returns the platform default factory, if one is compiled in.
#[must_use]
pub fn default_factory() -> Option<Arc<dyn TransportFactory>> {
    #[cfg(feature = "websocket")]
    {
        Some(Arc::new(WebSocketFactory::new()))
    }

    #[cfg(not(feature = "websocket"))]
    {
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
