//! Outbound queue and send gate.
//!
//! # Send Gate
//!
//! | Transport | Handshake | Connection-scoped message | Operation message |
//! |-----------|-----------|---------------------------|-------------------|
//! | connecting (or reconnect pending) | any | queue | queue |
//! | open | not acknowledged | transmit | queue |
//! | open | acknowledged | transmit | transmit |
//! | closing / closed | any | reject | reject |
//!
//! The queue is drained once per handshake, on `connection_ack`, in FIFO
//! order.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use crate::identifiers::OperationId;
use crate::protocol::{ClientMessage, MessageType};
use crate::transport::ReadyState;

// ============================================================================
// HandshakeState
// ============================================================================

/// Handshake progress on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Transport not open yet.
    NotStarted,
    /// `connection_init` sent.
    AwaitingAck,
    /// `connection_ack` received.
    Acknowledged,
}

// ============================================================================
// Gate
// ============================================================================

/// What to do with an outbound message right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Serialize and write to the transport.
    Transmit,
    /// Append to the outbound queue.
    Enqueue,
    /// Fail with `SocketUnavailable`.
    Reject,
}

/// Whether a message of type `ty` is sent, queued or rejected.
#[must_use]
pub fn gate(ready: ReadyState, handshake: HandshakeState, ty: MessageType) -> Gate {
    if ready.is_terminal() {
        return Gate::Reject;
    }
    if ready == ReadyState::Connecting {
        return Gate::Enqueue;
    }

    let connection_scoped = matches!(
        ty,
        MessageType::ConnectionInit | MessageType::ConnectionTerminate | MessageType::KeepAlive
    );

    if connection_scoped || handshake == HandshakeState::Acknowledged {
        Gate::Transmit
    } else {
        Gate::Enqueue
    }
}

/// Result of a gated send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the transport.
    Sent,
    /// Held until the handshake completes.
    Queued,
}

// ============================================================================
// OutboundQueue
// ============================================================================

/// Messages waiting for the handshake, in enqueue order.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<ClientMessage>,
}

impl OutboundQueue {
    /// Creates an empty queue.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued messages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends a message.
    #[inline]
    pub fn push(&mut self, message: ClientMessage) {
        self.messages.push_back(message);
    }

    /// Drops every queued message addressed to `id`. Returns how many.
    pub fn remove_operation(&mut self, id: &OperationId) -> usize {
        let before = self.messages.len();
        self.messages.retain(|message| message.operation_id() != Some(id));
        before - self.messages.len()
    }

    /// Takes every queued message, oldest first.
    #[must_use]
    pub fn take_all(&mut self) -> Vec<ClientMessage> {
        self.messages.drain(..).collect()
    }

    /// Discards everything.
    #[inline]
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
