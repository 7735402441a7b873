//! GraphQL subscriptions over WebSocket.
//!
//! This library multiplexes GraphQL subscription operations over one
//! WebSocket connection per endpoint, speaking the `graphql-ws`
//! sub-protocol (`connection_init` / `start` / `data` / `stop`).
//!
//! # Architecture
//!
//! - **Event loop**: one task owns every connection; callers talk to it
//!   through a cloneable [`SubscriptionClient`] handle
//! - **Connection registry**: at most one connection per endpoint, opened on
//!   first subscribe, closed when its last operation goes away
//! - **Operation table**: per connection, the set of live subscriptions and
//!   their callbacks
//! - **Outbound queue**: `start`/`stop` held until `connection_ack`, then
//!   flushed in order
//! - **Reconnect** (optional): exponential backoff with jitter, replaying
//!   every live subscription on the new transport
//!
//! # Quick Start
//!
//! ```no_run
//! use graphql_socket::{Result, SubscriptionClient, Update};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = SubscriptionClient::builder().build()?;
//!
//!     client.subscribe(
//!         "wss://api.example.com/graphql",
//!         "subscription { messageAdded { id text } }",
//!         json!({}),
//!         0,
//!         |update| match update {
//!             Update::Data(results) => println!("latest: {:?}", results.last()),
//!             other => eprintln!("{other:?}"),
//!         },
//!     );
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     client.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Subscription engine: client, registry, state machine |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Endpoint and operation identities |
//! | [`protocol`] | `graphql-ws` message types |
//! | [`transport`] | Transport traits, WebSocket and loopback transports |
//!
//! # Features
//!
//! - `websocket` (default): the [`WebSocketFactory`] transport over
//!   `tokio-tungstenite` with rustls. Without it a transport must be
//!   supplied through [`ClientBuilder::transport`].

// ============================================================================
// Modules
// ============================================================================

/// Subscription engine.
///
/// Use [`SubscriptionClient::builder()`] to create a configured client.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Endpoint and operation identities.
///
/// Stable fingerprints used as registry keys and wire operation ids.
pub mod identifiers;

/// `graphql-ws` protocol message types.
pub mod protocol;

/// Transport abstraction.
///
/// The engine only sees the [`Transport`] and [`TransportFactory`] traits.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{
    ClientBuilder, ClientStats, CloseReason, EndpointStats, ErrorHandler, OperationStatus,
    ReconnectPolicy, SubscriptionClient, Update, UpdateHandler,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{EndpointId, OperationId};

// Protocol types
pub use protocol::{ClientMessage, MessageType, ServerMessage};

// Transport types
pub use transport::{
    EventSink, LoopbackFactory, LoopbackPeer, LoopbackServer, ReadyState, Transport,
    TransportEvent, TransportFactory,
};

#[cfg(feature = "websocket")]
pub use transport::WebSocketFactory;
