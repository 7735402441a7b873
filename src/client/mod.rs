//! Subscription engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SubscriptionClient`] | Public handle; owns the event loop |
//! | [`ClientBuilder`] | Fluent configuration, validated at `build()` |
//! | [`OperationTable`] | Operations multiplexed on a connection |
//! | [`OutboundQueue`] | Messages held until the handshake completes |
//! | [`ReconnectPolicy`] | Backoff settings for unexpected closes |
//!
//! # Example
//!
//! ```no_run
//! use graphql_socket::{SubscriptionClient, Update};
//! use serde_json::json;
//!
//! # async fn example() -> graphql_socket::Result<()> {
//! let client = SubscriptionClient::builder().build()?;
//!
//! client.subscribe("wss://h/s", "subscription{m{id}}", json!({}), 0, |update| {
//!     if let Update::Closed(reason) = update {
//!         eprintln!("closed: {reason}");
//!     }
//! });
//!
//! client.unsubscribe("wss://h/s", "subscription{m{id}}", &json!({}), 0);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Client configuration and builder.
pub mod config;

/// Per-endpoint protocol state machine.
mod connection;

/// Operations, updates and the operation table.
pub mod operation;

/// Outbound queue and send gate.
pub mod queue;

/// Reconnect policy and backoff.
pub mod reconnect;

/// Connection registry and stats.
pub mod registry;

mod core;
mod timer;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::SubscriptionClient;
pub use config::{ClientBuilder, ClientConfig, DEFAULT_HISTORY_LIMIT, ErrorHandler};
pub use operation::{
    CloseReason, Operation, OperationStatus, OperationTable, Update, UpdateHandler,
};
pub use queue::{Gate, HandshakeState, OutboundQueue, SendOutcome, gate};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use registry::{ClientStats, EndpointStats};
