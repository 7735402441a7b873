//! Connection registry owned by the event loop.
//!
//! Maps endpoint URLs to live connections, creates them on first use
//! and removes them when their last operation goes away. Every mutation of
//! connection state happens here, on the event loop task.

// ============================================================================
// Imports
// ============================================================================

use std::collections::hash_map::Entry;
use std::ops::ControlFlow;

use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{EndpointId, OperationId};
use crate::transport::{ReadyState, TransportEvent};

use super::config::ClientConfig;
use super::connection::{Connection, Context, Disposition};
use super::core::Command;
use super::operation::{CloseReason, Operation, Update, UpdateHandler};
use super::queue::HandshakeState;
use super::timer::Scheduler;

// ============================================================================
// Stats
// ============================================================================

/// Snapshot of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStats {
    /// Endpoint URL.
    pub endpoint: String,
    /// Transport readiness.
    pub ready_state: ReadyState,
    /// Handshake progress.
    pub handshake: HandshakeState,
    /// Registered operations.
    pub operations: usize,
    /// Messages waiting for the handshake.
    pub queued: usize,
    /// Reconnect attempts since the last acknowledged handshake.
    pub reconnect_attempt: u32,
}

/// Snapshot of every connection, ordered by endpoint URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// One entry per live connection.
    pub endpoints: Vec<EndpointStats>,
}

impl ClientStats {
    /// Total operations across all connections.
    #[must_use]
    pub fn operations(&self) -> usize {
        self.endpoints.iter().map(|e| e.operations).sum()
    }

    /// Looks up one endpoint.
    #[must_use]
    pub fn endpoint(&self, url: &str) -> Option<&EndpointStats> {
        self.endpoints.iter().find(|e| e.endpoint == url)
    }
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// All live connections, keyed by endpoint.
#[derive(Debug)]
pub(crate) struct ConnectionRegistry {
    connections: FxHashMap<EndpointId, Connection>,
    ctx: Context,
    next_generation: u64,
}

impl ConnectionRegistry {
    pub(crate) fn new(config: ClientConfig, scheduler: Scheduler) -> Self {
        Self {
            connections: FxHashMap::default(),
            ctx: Context { config, scheduler },
            next_generation: 0,
        }
    }

    /// Applies one command. Breaks on shutdown.
    pub(crate) fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Subscribe {
                endpoint,
                query,
                variables,
                disambiguator,
                handler,
            } => self.subscribe(&endpoint, query, variables, disambiguator, handler),

            Command::Unsubscribe {
                endpoint,
                query,
                variables,
                disambiguator,
            } => {
                let id = OperationId::new(&endpoint, &query, &variables, disambiguator);
                self.unsubscribe(EndpointId::from_url(&endpoint), &id);
            }

            Command::Release { endpoint } => {
                self.release(EndpointId::from_url(&endpoint));
            }

            Command::Transport {
                endpoint,
                generation,
                event,
            } => self.on_transport_event(endpoint, generation, event),

            Command::KeepaliveExpired {
                endpoint,
                generation,
                epoch,
            } => self.on_keepalive_expired(endpoint, generation, epoch),

            Command::Reconnect {
                endpoint,
                generation,
            } => self.reconnect(endpoint, generation),

            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }

            Command::Shutdown => return ControlFlow::Break(()),
        }

        ControlFlow::Continue(())
    }

    /// Number of live connections.
    #[inline]
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    /// Looks up a connection by URL.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn get(&self, url: &str) -> Option<&Connection> {
        self.connections.get(&EndpointId::from_url(url))
    }

    /// Returns the connection for `url`, opening a transport on first use.
    ///
    /// # Errors
    ///
    /// Returns the transport factory's error if the transport cannot be created.
    pub(crate) fn resolve(&mut self, url: &str) -> Result<&mut Connection> {
        let id = EndpointId::from_url(url);

        match self.connections.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                self.next_generation += 1;
                let generation = self.next_generation;
                let sink = self.ctx.scheduler.sink(id, generation);
                let transport = self.ctx.config.transport.open(url, sink)?;

                info!(endpoint = url, %id, generation, "Connection created");
                Ok(entry.insert(Connection::new(url, generation, transport, &self.ctx)))
            }
        }
    }

    /// Snapshot of every connection.
    #[must_use]
    pub(crate) fn stats(&self) -> ClientStats {
        let mut endpoints: Vec<EndpointStats> =
            self.connections.values().map(Connection::stats).collect();
        endpoints.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        ClientStats { endpoints }
    }
}

// ============================================================================
// ConnectionRegistry - Operations
// ============================================================================

impl ConnectionRegistry {
    pub(crate) fn subscribe(
        &mut self,
        endpoint: &str,
        query: String,
        variables: Value,
        disambiguator: u64,
        handler: UpdateHandler,
    ) {
        let id = OperationId::new(endpoint, &query, &variables, disambiguator);

        let connection = match self.resolve(endpoint) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(endpoint, error = %e, "Cannot open connection");
                handler(Update::Unavailable(e.to_string()));
                return;
            }
        };

        let key = connection.id();
        let disposition = connection.add_operation(Operation::new(id, query, variables, handler));
        self.apply(key, disposition);
    }

    pub(crate) fn unsubscribe(&mut self, endpoint: EndpointId, id: &OperationId) {
        let Some(connection) = self.connections.get_mut(&endpoint) else {
            trace!(%endpoint, operation = %id, "Unsubscribe for unknown endpoint");
            return;
        };

        let disposition = connection.remove_operation(id, &self.ctx);
        self.apply(endpoint, disposition);
    }

    /// Closes a connection on the caller's request.
    pub(crate) fn release(&mut self, endpoint: EndpointId) {
        let Some(mut connection) = self.connections.remove(&endpoint) else {
            trace!(%endpoint, "Release for unknown endpoint");
            return;
        };

        connection.terminate(&self.ctx);
        let operations = connection.take_operations();
        info!(endpoint = connection.url(), operations = operations.len(), "Connection released");

        for operation in operations {
            operation.notify(Update::Closed(CloseReason::Released));
        }
    }

    /// Releases every connection.
    pub(crate) fn shutdown(&mut self) {
        let endpoints: Vec<EndpointId> = self.connections.keys().copied().collect();
        for endpoint in endpoints {
            self.release(endpoint);
        }
        debug!("Registry shut down");
    }

    fn apply(&mut self, endpoint: EndpointId, disposition: Disposition) {
        match disposition {
            Disposition::Continue => {}
            Disposition::Drained => self.finish(endpoint),
            Disposition::Failed(reason) => self.fail(endpoint, reason),
        }
    }

    /// Last operation gone: terminate quietly.
    fn finish(&mut self, endpoint: EndpointId) {
        if let Some(mut connection) = self.connections.remove(&endpoint) {
            connection.terminate(&self.ctx);
            info!(endpoint = connection.url(), "Connection drained");
        }
    }

    /// Connection-scoped failure: every operation is told and removed.
    fn fail(&mut self, endpoint: EndpointId, reason: CloseReason) {
        let Some(mut connection) = self.connections.remove(&endpoint) else {
            return;
        };

        connection.close_transport();
        let operations = connection.take_operations();
        warn!(
            endpoint = connection.url(),
            reason = %reason,
            operations = operations.len(),
            "Connection closed"
        );

        for operation in operations {
            operation.notify(Update::Closed(reason.clone()));
        }
    }
}

// ============================================================================
// ConnectionRegistry - Transport Events
// ============================================================================

impl ConnectionRegistry {
    fn on_transport_event(&mut self, endpoint: EndpointId, generation: u64, event: TransportEvent) {
        let Some(connection) = self.connections.get_mut(&endpoint) else {
            trace!(%endpoint, "Event for released connection ignored");
            return;
        };

        if connection.generation() != generation || connection.is_reconnecting() {
            trace!(%endpoint, generation, "Stale transport event ignored");
            return;
        }

        let disposition = match event {
            TransportEvent::Open => connection.on_open(),
            TransportEvent::Message(text) => connection.on_message(&text, &self.ctx),
            TransportEvent::Error(message) => {
                connection.on_transport_error(&message);
                Disposition::Continue
            }
            TransportEvent::Close { code, reason } => {
                self.connection_lost(endpoint, CloseReason::Remote { code, reason });
                return;
            }
        };

        self.apply(endpoint, disposition);
    }

    fn on_keepalive_expired(&mut self, endpoint: EndpointId, generation: u64, epoch: u64) {
        let Some(connection) = self.connections.get(&endpoint) else {
            return;
        };

        if connection.generation() != generation || connection.keepalive_epoch() != Some(epoch) {
            trace!(%endpoint, epoch, "Stale keepalive timer ignored");
            return;
        }

        let timeout = self.ctx.config.keepalive_timeout.unwrap_or_default();
        warn!(endpoint = connection.url(), ?timeout, "Keepalive timeout");

        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.ctx.config.report(&Error::keepalive_timeout(millis));
        self.connection_lost(endpoint, CloseReason::KeepaliveTimeout);
    }

    /// Transport gone without the caller asking: reconnect or tear down.
    fn connection_lost(&mut self, endpoint: EndpointId, reason: CloseReason) {
        let Some(connection) = self.connections.get_mut(&endpoint) else {
            return;
        };

        connection.detach();

        match connection.schedule_reconnect(&self.ctx) {
            Some((attempt, delay)) => {
                info!(
                    endpoint = connection.url(),
                    reason = %reason,
                    attempt,
                    ?delay,
                    "Connection lost, reconnecting"
                );
                connection
                    .operations()
                    .broadcast(&Update::Reconnecting { attempt, delay });
            }
            None => self.fail(endpoint, reason),
        }
    }

    fn reconnect(&mut self, endpoint: EndpointId, generation: u64) {
        let Some(connection) = self.connections.get_mut(&endpoint) else {
            return;
        };

        if connection.generation() != generation || !connection.is_reconnecting() {
            trace!(%endpoint, generation, "Stale reconnect timer ignored");
            return;
        }

        self.next_generation += 1;
        let next = self.next_generation;
        let sink = self.ctx.scheduler.sink(endpoint, next);

        match self.ctx.config.transport.open(connection.url(), sink) {
            Ok(transport) => {
                debug!(endpoint = connection.url(), generation = next, "Transport reopened");
                connection.attach(transport, next, &self.ctx);
            }
            Err(e) => {
                warn!(%endpoint, error = %e, "Reconnect attempt failed");
                self.connection_lost(endpoint, CloseReason::Unreachable(e.to_string()));
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
