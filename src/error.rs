//! Error types for the subscription engine.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! Only construction is fallible from the caller's point of view:
//!
//! ```ignore
//! use graphql_socket::{Result, SubscriptionClient};
//!
//! fn example() -> Result<SubscriptionClient> {
//!     SubscriptionClient::builder().build()
//! }
//! ```
//!
//! After construction, failures are delivered through the subscription
//! callback as [`Update`](crate::Update) values, or through the configured
//! error handler when no single operation can be blamed.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::TransportUnavailable`], [`Error::InvalidEndpoint`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::KeepaliveTimeout`], [`Error::SocketUnavailable`] |
//! | Protocol | [`Error::Parse`], [`Error::Protocol`] |
//! | External | [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
#[cfg(feature = "websocket")]
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned by the client builder when a setting is out of range.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// No transport implementation is available.
    ///
    /// Returned at construction when the default WebSocket transport is
    /// compiled out and no transport factory was supplied.
    #[error("No transport available: enable the `websocket` feature or supply a transport factory")]
    TransportUnavailable,

    /// Endpoint URL rejected by the transport.
    #[error("Invalid endpoint {endpoint}: {message}")]
    InvalidEndpoint {
        /// The endpoint URL as given by the caller.
        endpoint: String,
        /// Why it was rejected.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport failed to connect or failed mid-stream.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Transport closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No keepalive arrived within the configured window.
    #[error("Keepalive timeout after {timeout_ms}ms")]
    KeepaliveTimeout {
        /// Configured keepalive window in milliseconds.
        timeout_ms: u64,
    },

    /// Attempted send on a closing or closed transport.
    ///
    /// Carries the serialized frame that was not sent.
    #[error(
        "Socket is not connected, is closing or is already closed. The message {message} was not sent"
    )]
    SocketUnavailable {
        /// The rejected frame.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Inbound frame is not well-formed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parse failure.
        message: String,
    },

    /// Inbound frame violates the sub-protocol.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid endpoint error.
    #[inline]
    pub fn invalid_endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a keepalive timeout error.
    #[inline]
    pub fn keepalive_timeout(timeout_ms: u64) -> Self {
        Self::KeepaliveTimeout { timeout_ms }
    }

    /// Creates a socket unavailable error for a rejected frame.
    #[inline]
    pub fn socket_unavailable(message: impl Into<String>) -> Self {
        Self::SocketUnavailable {
            message: message.into(),
        }
    }

    /// Creates a parse error.
    #[inline]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection-scoped error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        #[cfg(feature = "websocket")]
        if matches!(self, Self::WebSocket(_)) {
            return true;
        }

        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::KeepaliveTimeout { .. }
                | Self::SocketUnavailable { .. }
        )
    }

    /// Returns `true` if this error may clear up on reconnect.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::KeepaliveTimeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
