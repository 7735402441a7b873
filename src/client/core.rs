//! Subscription client and its event loop.
//!
//! A [`SubscriptionClient`] is a cheap, cloneable handle. All connection
//! state lives in one spawned task that processes [`Command`]s one at a
//! time, so callbacks never run concurrently with each other or with a
//! state transition.
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
//! client.subscribe(
//!     "wss://api.example.com/graphql",
//!     "subscription { messages { id } }",
//!     json!({}),
//!     0,
//!     |update| {
//!         if let Update::Data(results) = update {
//!             println!("{} results", results.len());
//!         }
//!     },
//! );
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identifiers::{EndpointId, OperationId};
use crate::transport::TransportEvent;

use super::config::{ClientBuilder, ClientConfig};
use super::operation::{Update, UpdateHandler};
use super::registry::{ClientStats, ConnectionRegistry};
use super::timer::Scheduler;

// ============================================================================
// Command
// ============================================================================

/// Messages processed by the event loop.
pub(crate) enum Command {
    /// Register an operation.
    Subscribe {
        endpoint: String,
        query: String,
        variables: Value,
        disambiguator: u64,
        handler: UpdateHandler,
    },
    /// Remove an operation.
    Unsubscribe {
        endpoint: String,
        query: String,
        variables: Value,
        disambiguator: u64,
    },
    /// Close one endpoint.
    Release { endpoint: String },
    /// Transport event tagged with its connection generation.
    Transport {
        endpoint: EndpointId,
        generation: u64,
        event: TransportEvent,
    },
    /// Keepalive window elapsed.
    KeepaliveExpired {
        endpoint: EndpointId,
        generation: u64,
        epoch: u64,
    },
    /// Reconnect backoff elapsed.
    Reconnect { endpoint: EndpointId, generation: u64 },
    /// Snapshot request.
    Stats { reply: oneshot::Sender<ClientStats> },
    /// Close everything and stop the loop.
    Shutdown,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe {
                endpoint, query, ..
            } => f
                .debug_struct("Subscribe")
                .field("endpoint", endpoint)
                .field("query", query)
                .finish_non_exhaustive(),
            Self::Unsubscribe {
                endpoint, query, ..
            } => f
                .debug_struct("Unsubscribe")
                .field("endpoint", endpoint)
                .field("query", query)
                .finish_non_exhaustive(),
            Self::Release { endpoint } => {
                f.debug_struct("Release").field("endpoint", endpoint).finish()
            }
            Self::Transport {
                endpoint,
                generation,
                event,
            } => f
                .debug_struct("Transport")
                .field("endpoint", endpoint)
                .field("generation", generation)
                .field("event", event)
                .finish(),
            Self::KeepaliveExpired {
                endpoint,
                generation,
                epoch,
            } => f
                .debug_struct("KeepaliveExpired")
                .field("endpoint", endpoint)
                .field("generation", generation)
                .field("epoch", epoch)
                .finish(),
            Self::Reconnect {
                endpoint,
                generation,
            } => f
                .debug_struct("Reconnect")
                .field("endpoint", endpoint)
                .field("generation", generation)
                .finish(),
            Self::Stats { .. } => f.write_str("Stats"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

// ============================================================================
// SubscriptionClient
// ============================================================================

/// Handle to a running subscription engine.
///
/// Cloning is cheap; every clone talks to the same event loop. The loop
/// stops on [`SubscriptionClient::shutdown`] or once every handle is
/// dropped.
///
/// # Thread Safety
///
/// `SubscriptionClient` is `Send + Sync`. Its methods never block and
/// never fail: problems are delivered to the operation's callback as an
/// [`Update`].
#[derive(Clone)]
pub struct SubscriptionClient {
    command_tx: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for SubscriptionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionClient")
            .field("running", &self.is_running())
            .finish()
    }
}

// ============================================================================
// SubscriptionClient - Constructor
// ============================================================================

impl SubscriptionClient {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Spawns the event loop for a validated configuration.
    pub(crate) fn start(config: ClientConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(command_tx.downgrade());
        let registry = ConnectionRegistry::new(config, scheduler);

        tokio::spawn(Self::run_event_loop(registry, command_rx));

        Self { command_tx }
    }

    async fn run_event_loop(
        mut registry: ConnectionRegistry,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        while let Some(command) = command_rx.recv().await {
            if registry.handle_command(command).is_break() {
                debug!("Shutdown command received");
                break;
            }
        }

        debug!(connections = registry.len(), "Event loop stopping");
        registry.shutdown();
        debug!("Event loop terminated");
    }
}

// ============================================================================
// SubscriptionClient - Public API
// ============================================================================

impl SubscriptionClient {
    /// Subscribes to `query` on `endpoint`.
    ///
    /// Opens a connection on first use of `endpoint`. Subscribing again with
    /// the same `(endpoint, query, variables, disambiguator)` keeps the
    /// existing operation and replaces its callback.
    ///
    /// Returns the operation's identity.
    pub fn subscribe(
        &self,
        endpoint: &str,
        query: &str,
        variables: Value,
        disambiguator: u64,
        on_update: impl Fn(Update) + Send + Sync + 'static,
    ) -> OperationId {
        let id = OperationId::new(endpoint, query, &variables, disambiguator);

        let command = Command::Subscribe {
            endpoint: endpoint.to_owned(),
            query: query.to_owned(),
            variables,
            disambiguator,
            handler: Arc::new(on_update),
        };

        if let Err(mpsc::error::SendError(Command::Subscribe { handler, .. })) =
            self.command_tx.send(command)
        {
            warn!(endpoint, operation = %id, "Subscribe after shutdown");
            handler(Update::Unavailable(Error::ConnectionClosed.to_string()));
        }

        id
    }

    /// Stops an operation.
    ///
    /// Sends `stop` if the operation was started. Unknown operations are
    /// ignored, so calling this twice is harmless.
    pub fn unsubscribe(&self, endpoint: &str, query: &str, variables: &Value, disambiguator: u64) {
        self.post(Command::Unsubscribe {
            endpoint: endpoint.to_owned(),
            query: query.to_owned(),
            variables: variables.clone(),
            disambiguator,
        });
    }

    /// Closes `endpoint` and removes all of its operations.
    ///
    /// Each callback receives [`Update::Closed`] with
    /// [`CloseReason::Released`](crate::client::CloseReason::Released).
    pub fn release(&self, endpoint: &str) {
        self.post(Command::Release {
            endpoint: endpoint.to_owned(),
        });
    }

    /// Closes every connection and stops the event loop.
    pub fn shutdown(&self) {
        self.post(Command::Shutdown);
    }

    /// Identity an operation would get, without subscribing.
    #[inline]
    #[must_use]
    pub fn operation_id(
        endpoint: &str,
        query: &str,
        variables: &Value,
        disambiguator: u64,
    ) -> OperationId {
        OperationId::new(endpoint, query, variables, disambiguator)
    }

    /// Returns `true` until the event loop has stopped.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Snapshot of every live connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the event loop has stopped.
    pub async fn stats(&self) -> Result<ClientStats> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Stats { reply })
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    fn post(&self, command: Command) {
        if let Err(e) = self.command_tx.send(command) {
            debug!(command = ?e.0, "Event loop stopped, command dropped");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::client::operation::CloseReason;
    use crate::transport::loopback;

    const URL: &str = "ws://local/graphql";
    const QUERY: &str = "subscription{m{id}}";

    fn recorder() -> (
        impl Fn(Update) + Send + Sync + 'static,
        Arc<Mutex<Vec<Update>>>,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        (move |u: Update| seen_clone.lock().push(u), seen)
    }

    #[test]
    fn test_operation_id_is_static() {
        let a = SubscriptionClient::operation_id(URL, QUERY, &json!({}), 0);
        let b = SubscriptionClient::operation_id(URL, QUERY, &json!({}), 1);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_stats_via_event_loop() {
        let (factory, mut server) = loopback::pair();
        let client = SubscriptionClient::builder()
            .transport(factory)
            .build()
            .expect("client");

        let (callback, _) = recorder();
        client.subscribe(URL, QUERY, json!({}), 0, callback);
        let _peer = server.accept().await.expect("peer");

        let stats = client.stats().await.expect("stats");
        assert_eq!(stats.operations(), 1);
        assert_eq!(stats.endpoints[0].endpoint, URL);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop_and_releases() {
        let (factory, mut server) = loopback::pair();
        let client = SubscriptionClient::builder()
            .transport(factory)
            .build()
            .expect("client");

        let (callback, seen) = recorder();
        client.subscribe(URL, QUERY, json!({}), 0, callback);
        let _peer = server.accept().await.expect("peer");

        client.shutdown();
        tokio::time::timeout(Duration::from_secs(1), async {
            while client.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("loop stopped");

        assert_eq!(*seen.lock(), vec![Update::Closed(CloseReason::Released)]);
        assert!(client.stats().await.is_err());
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_reports_unavailable() {
        let (factory, _server) = loopback::pair();
        let client = SubscriptionClient::builder()
            .transport(factory)
            .build()
            .expect("client");

        client.shutdown();
        tokio::time::timeout(Duration::from_secs(1), async {
            while client.is_running() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("loop stopped");

        let (callback, seen) = recorder();
        client.subscribe(URL, QUERY, json!({}), 0, callback);
        assert!(matches!(seen.lock().as_slice(), [Update::Unavailable(_)]));
    }

    #[test]
    fn test_command_debug_hides_handler() {
        let command = Command::Subscribe {
            endpoint: URL.into(),
            query: QUERY.into(),
            variables: json!({}),
            disambiguator: 0,
            handler: Arc::new(|_: Update| {}),
        };
        let rendered = format!("{command:?}");
        assert!(rendered.starts_with("Subscribe"));
        assert!(rendered.contains(URL));
    }
}
