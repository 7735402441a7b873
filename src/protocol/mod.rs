//! `graphql-ws` sub-protocol message types.
//!
//! Every frame is a JSON object `{ id?, type, payload? }`.
//!
//! # Protocol Overview
//!
//! | Type | Direction | Scope | Purpose |
//! |------|-----------|-------|---------|
//! | `connection_init` | Client → Server | connection | Open the handshake |
//! | `connection_ack` | Server → Client | connection | Handshake accepted |
//! | `connection_error` | Server → Client | connection | Handshake rejected |
//! | `ka` | both | connection | Keepalive heartbeat |
//! | `connection_terminate` | Client → Server | connection | Close gracefully |
//! | `start` | Client → Server | operation | Begin a subscription |
//! | `data` | Server → Client | operation | Subscription result |
//! | `error` | Server → Client | operation | GraphQL-level failure |
//! | `complete` | Server → Client | operation | Subscription finished |
//! | `stop` | Client → Server | operation | Cancel a subscription |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Outbound and inbound message types |

// ============================================================================
// Submodules
// ============================================================================

/// Outbound and inbound message types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{
    ClientMessage, DataResult, MessageType, SUB_PROTOCOL, ServerMessage, StartPayload,
};
