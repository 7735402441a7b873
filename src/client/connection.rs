//! One transport connection and its protocol state machine.
//!
//! # Handshake
//!
//! ```text
//! NotStarted ──transport open / connection_init──► AwaitingAck
//! AwaitingAck ──connection_ack / flush queue──────► Acknowledged
//! ```
//!
//! The keepalive window starts as soon as a transport is installed, so a
//! server that never acknowledges is treated like one that went silent.
//!
//! # Inbound Dispatch
//!
//! | Message | Effect |
//! |---------|--------|
//! | `connection_ack` | flush the outbound queue, arm keepalive |
//! | `connection_error` | connection fails |
//! | `ka` | re-arm keepalive, echo `ka` |
//! | `data` | append to the operation's history and notify |
//! | `error` | notify and remove the operation |
//! | `complete` | notify and remove the operation |
//! | anything else | connection fails with a protocol error |
//!
//! Messages for operations not in the table are ignored.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{EndpointId, OperationId};
use crate::protocol::{ClientMessage, DataResult, ServerMessage};
use crate::transport::{ReadyState, Transport};

use super::config::ClientConfig;
use super::core::Command;
use super::operation::{CloseReason, Operation, OperationStatus, OperationTable, Update};
use super::queue::{Gate, HandshakeState, OutboundQueue, SendOutcome, gate};
use super::reconnect::Backoff;
use super::registry::EndpointStats;
use super::timer::{Scheduler, TimerHandle};

// ============================================================================
// Context
// ============================================================================

/// Everything a connection needs from its owner.
#[derive(Debug, Clone)]
pub(crate) struct Context {
    pub(crate) config: ClientConfig,
    pub(crate) scheduler: Scheduler,
}

// ============================================================================
// Disposition
// ============================================================================

/// What the registry must do after a connection handled an event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Disposition {
    /// Nothing.
    Continue,
    /// Last operation removed: terminate and release.
    Drained,
    /// Connection-scoped failure: notify every operation and release.
    Failed(CloseReason),
}

// ============================================================================
// Connection
// ============================================================================

/// A transport plus the operations multiplexed on it.
pub(crate) struct Connection {
    url: String,
    id: EndpointId,
    /// Generation of the current (or last) transport.
    generation: u64,
    /// `None` while a reconnect is pending.
    transport: Option<Box<dyn Transport>>,
    handshake: HandshakeState,
    operations: OperationTable,
    queue: OutboundQueue,
    keepalive: Option<TimerHandle>,
    keepalive_epoch: u64,
    backoff: Option<Backoff>,
    reconnect_timer: Option<TimerHandle>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("generation", &self.generation)
            .field("ready_state", &self.ready_state())
            .field("handshake", &self.handshake)
            .field("operations", &self.operations.len())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Constructor & Accessors
// ============================================================================

impl Connection {
    pub(crate) fn new(
        url: impl Into<String>,
        generation: u64,
        transport: Box<dyn Transport>,
        ctx: &Context,
    ) -> Self {
        let url = url.into();
        let mut connection = Self {
            id: EndpointId::from_url(&url),
            url,
            generation,
            transport: Some(transport),
            handshake: HandshakeState::NotStarted,
            operations: OperationTable::new(),
            queue: OutboundQueue::new(),
            keepalive: None,
            keepalive_epoch: 0,
            backoff: ctx.config.reconnect.map(Backoff::new),
            reconnect_timer: None,
        };
        connection.arm_keepalive(ctx);
        connection
    }

    /// Endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Registry key.
    #[inline]
    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// Generation of the current transport.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handshake progress.
    #[inline]
    #[must_use]
    pub fn handshake(&self) -> HandshakeState {
        self.handshake
    }

    /// Operations on this connection.
    #[inline]
    #[must_use]
    pub fn operations(&self) -> &OperationTable {
        &self.operations
    }

    /// Number of messages waiting for the handshake.
    #[inline]
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Transport readiness. A pending reconnect reads as connecting.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.transport
            .as_ref()
            .map_or(ReadyState::Connecting, |transport| transport.ready_state())
    }

    /// Returns `true` while waiting for a reconnect timer.
    #[inline]
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.transport.is_none()
    }

    pub(crate) fn keepalive_epoch(&self) -> Option<u64> {
        self.keepalive.as_ref().map(|_| self.keepalive_epoch)
    }

    pub(crate) fn stats(&self) -> EndpointStats {
        EndpointStats {
            endpoint: self.url.clone(),
            ready_state: self.ready_state(),
            handshake: self.handshake,
            operations: self.operations.len(),
            queued: self.queue.len(),
            reconnect_attempt: self.backoff.as_ref().map_or(0, Backoff::attempt),
        }
    }
}

// ============================================================================
// Connection - Send Gate
// ============================================================================

impl Connection {
    /// Sends, queues or rejects a message depending on readiness.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SocketUnavailable`] if the transport is closing or closed.
    pub(crate) fn send(&mut self, message: ClientMessage) -> Result<SendOutcome> {
        match gate(self.ready_state(), self.handshake, message.message_type()) {
            Gate::Transmit => {
                self.transmit(&message)?;
                Ok(SendOutcome::Sent)
            }
            Gate::Enqueue => {
                trace!(endpoint = %self.url, ty = %message.message_type(), "Message queued");
                self.queue.push(message);
                Ok(SendOutcome::Queued)
            }
            Gate::Reject => Err(Error::socket_unavailable(
                message
                    .to_frame()
                    .unwrap_or_else(|_| message.message_type().to_string()),
            )),
        }
    }

    fn transmit(&self, message: &ClientMessage) -> Result<()> {
        let frame = message.to_frame()?;
        match &self.transport {
            Some(transport) => {
                transport.send(frame)?;
                trace!(endpoint = %self.url, ty = %message.message_type(), "Message sent");
                Ok(())
            }
            None => Err(Error::socket_unavailable(frame)),
        }
    }
}

// ============================================================================
// Connection - Operations
// ============================================================================

impl Connection {
    /// Registers an operation and sends (or queues) its `start`.
    ///
    /// An operation whose identity is already present keeps its state and
    /// history; only the callback is replaced.
    pub(crate) fn add_operation(&mut self, operation: Operation) -> Disposition {
        let id = operation.id().clone();

        if self.operations.contains(&id) {
            self.operations.replace_handler(&id, operation.into_handler());
            debug!(endpoint = %self.url, operation = %id, "Operation already subscribed");
            return Disposition::Continue;
        }

        let start = operation.start_message();
        self.operations.insert(operation);

        match self.send(start) {
            Ok(SendOutcome::Sent) => {
                self.set_status(&id, OperationStatus::Started);
                debug!(endpoint = %self.url, operation = %id, "Operation started");
                Disposition::Continue
            }
            Ok(SendOutcome::Queued) => {
                debug!(endpoint = %self.url, operation = %id, "Operation queued");
                Disposition::Continue
            }
            Err(e) => self.reject(&id, &e),
        }
    }

    /// Removes an operation, sending `stop` if it was started.
    ///
    /// Unknown identities are a no-op.
    pub(crate) fn remove_operation(&mut self, id: &OperationId, ctx: &Context) -> Disposition {
        let Some(operation) = self.operations.remove(id) else {
            trace!(endpoint = %self.url, operation = %id, "Unsubscribe for unknown operation");
            return Disposition::Continue;
        };

        match operation.status() {
            OperationStatus::Queued => {
                let dropped = self.queue.remove_operation(id);
                debug!(endpoint = %self.url, operation = %id, dropped, "Queued operation removed");
            }
            _ => {
                if let Err(e) = self.send(ClientMessage::stop(id.clone())) {
                    ctx.config.report(&e);
                }
                debug!(endpoint = %self.url, operation = %id, "Operation stopped");
            }
        }

        self.drained_or_continue()
    }

    fn set_status(&mut self, id: &OperationId, status: OperationStatus) {
        if let Some(operation) = self.operations.get_mut(id) {
            operation.set_status(status);
        }
    }

    /// Removes an operation whose message could not be sent and tells it why.
    fn reject(&mut self, id: &OperationId, error: &Error) -> Disposition {
        if let Some(mut operation) = self.operations.remove(id) {
            operation.set_status(OperationStatus::Failed);
            warn!(endpoint = %self.url, operation = %id, error = %error, "Operation rejected");
            operation.notify(Update::Unavailable(error.to_string()));
        }
        self.drained_or_continue()
    }

    fn drained_or_continue(&self) -> Disposition {
        if self.operations.is_empty() {
            Disposition::Drained
        } else {
            Disposition::Continue
        }
    }
}

// ============================================================================
// Connection - Transport Events
// ============================================================================

impl Connection {
    /// Transport opened: start the handshake.
    pub(crate) fn on_open(&mut self) -> Disposition {
        self.handshake = HandshakeState::AwaitingAck;
        debug!(
            endpoint = %self.url,
            generation = self.generation,
            "Transport open, sending connection_init"
        );

        match self.send(ClientMessage::connection_init()) {
            Ok(_) => Disposition::Continue,
            Err(e) => Disposition::Failed(CloseReason::Unreachable(e.to_string())),
        }
    }

    /// Transport error: report to every operation, keep them registered.
    pub(crate) fn on_transport_error(&self, message: &str) {
        warn!(endpoint = %self.url, error = message, "Transport error");
        self.operations.broadcast(&Update::TransportError(format!(
            "Server is not responding: {message}"
        )));
    }

    /// Handles one inbound text frame.
    pub(crate) fn on_message(&mut self, text: &str, ctx: &Context) -> Disposition {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(err @ Error::Parse { .. }) => {
                warn!(endpoint = %self.url, error = %err, "Malformed frame");
                self.operations.broadcast(&Update::ParseError(err.to_string()));
                ctx.config.report(&err);
                return Disposition::Continue;
            }
            Err(err) => return Disposition::Failed(CloseReason::Protocol(err.to_string())),
        };

        match message {
            ServerMessage::ConnectionAck => self.on_ack(ctx),
            ServerMessage::ConnectionError { payload } => {
                warn!(endpoint = %self.url, %payload, "Handshake rejected");
                Disposition::Failed(CloseReason::ConnectionRejected(payload))
            }
            ServerMessage::KeepAlive => {
                self.on_keepalive(ctx);
                Disposition::Continue
            }
            ServerMessage::Data { id, payload } => {
                self.on_data(&id, payload, ctx.config.history_limit);
                Disposition::Continue
            }
            ServerMessage::Error { id, payload } => self.on_operation_error(&id, payload),
            ServerMessage::Complete { id } => self.on_complete(&id),
            ServerMessage::Unexpected { kind } => {
                warn!(endpoint = %self.url, kind = %kind, "Unexpected message type");
                Disposition::Failed(CloseReason::Protocol(format!(
                    "unexpected message type `{kind}`"
                )))
            }
        }
    }

    fn on_ack(&mut self, ctx: &Context) -> Disposition {
        if self.handshake == HandshakeState::Acknowledged {
            debug!(endpoint = %self.url, "Duplicate connection_ack ignored");
            return Disposition::Continue;
        }

        self.handshake = HandshakeState::Acknowledged;
        if let Some(backoff) = &mut self.backoff {
            backoff.reset();
        }
        self.reconnect_timer = None;
        self.arm_keepalive(ctx);

        let pending = self.queue.take_all();
        info!(endpoint = %self.url, flushed = pending.len(), "Handshake acknowledged");

        let mut disposition = Disposition::Continue;
        for message in pending {
            let result = self.transmit(&message);
            match (message, result) {
                (ClientMessage::Start { id, .. }, Ok(())) => {
                    self.set_status(&id, OperationStatus::Started);
                }
                (ClientMessage::Start { id, .. }, Err(e)) => {
                    disposition = self.reject(&id, &e);
                }
                (_, Ok(())) => {}
                (_, Err(e)) => ctx.config.report(&e),
            }
        }

        disposition
    }

    fn on_keepalive(&mut self, ctx: &Context) {
        if ctx.config.keepalive_timeout.is_none() {
            trace!(endpoint = %self.url, "Keepalive received");
            return;
        }

        self.arm_keepalive(ctx);
        if let Err(e) = self.send(ClientMessage::KeepAlive) {
            ctx.config.report(&e);
        }
    }

    fn on_data(&mut self, id: &OperationId, payload: Value, history_limit: usize) {
        let Some(operation) = self.operations.get_mut(id) else {
            debug!(endpoint = %self.url, operation = %id, "Data for unknown operation ignored");
            return;
        };

        let update = match DataResult::from_payload(payload) {
            DataResult::Value(value) => operation.push_result(value, history_limit),
            DataResult::Errors(errors) => Update::GraphQLError(errors),
        };
        operation.notify(update);
    }

    fn on_operation_error(&mut self, id: &OperationId, payload: Value) -> Disposition {
        let Some(mut operation) = self.operations.remove(id) else {
            debug!(endpoint = %self.url, operation = %id, "Error for unknown operation ignored");
            return Disposition::Continue;
        };

        operation.set_status(OperationStatus::Failed);
        debug!(endpoint = %self.url, operation = %id, "Operation failed");
        operation.notify(Update::GraphQLError(payload));

        self.drained_or_continue()
    }

    fn on_complete(&mut self, id: &OperationId) -> Disposition {
        let Some(mut operation) = self.operations.remove(id) else {
            debug!(endpoint = %self.url, operation = %id, "Complete for unknown operation ignored");
            return Disposition::Continue;
        };

        operation.set_status(OperationStatus::Complete);
        debug!(endpoint = %self.url, operation = %id, "Operation complete");
        operation.notify(Update::Complete);

        self.drained_or_continue()
    }
}

// ============================================================================
// Connection - Keepalive & Reconnect
// ============================================================================

impl Connection {
    fn arm_keepalive(&mut self, ctx: &Context) {
        let Some(timeout) = ctx.config.keepalive_timeout else {
            return;
        };

        self.keepalive_epoch += 1;
        self.keepalive = Some(ctx.scheduler.schedule(
            timeout,
            Command::KeepaliveExpired {
                endpoint: self.id,
                generation: self.generation,
                epoch: self.keepalive_epoch,
            },
        ));
    }

    /// Drops the transport after an unexpected loss. Operations are kept
    /// and marked queued.
    pub(crate) fn detach(&mut self) {
        self.keepalive = None;
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.handshake = HandshakeState::NotStarted;
        self.queue.clear();
        self.operations.requeue_all();
    }

    /// Installs a fresh transport and queues a `start` for every operation.
    pub(crate) fn attach(
        &mut self,
        transport: Box<dyn Transport>,
        generation: u64,
        ctx: &Context,
    ) {
        self.transport = Some(transport);
        self.generation = generation;
        self.handshake = HandshakeState::NotStarted;
        self.reconnect_timer = None;
        self.queue.clear();

        let starts: Vec<ClientMessage> = self
            .operations
            .ordered()
            .into_iter()
            .map(Operation::start_message)
            .collect();
        for start in starts {
            self.queue.push(start);
        }

        self.arm_keepalive(ctx);
    }

    /// Schedules a reconnect if a policy is set, operations remain and
    /// attempts are left. Returns the 1-based attempt and its delay.
    pub(crate) fn schedule_reconnect(&mut self, ctx: &Context) -> Option<(u32, Duration)> {
        if self.operations.is_empty() {
            return None;
        }

        let backoff = self.backoff.as_mut()?;
        let delay = backoff.next_delay()?;
        let attempt = backoff.attempt();

        self.reconnect_timer = Some(ctx.scheduler.schedule(
            delay,
            Command::Reconnect {
                endpoint: self.id,
                generation: self.generation,
            },
        ));

        Some((attempt, delay))
    }

    /// Graceful close: `connection_terminate` if open, then close.
    pub(crate) fn terminate(&mut self, ctx: &Context) {
        if self.ready_state() == ReadyState::Open {
            if let Err(e) = self.transmit(&ClientMessage::ConnectionTerminate) {
                ctx.config.report(&e);
            }
            debug!(endpoint = %self.url, "connection_terminate sent");
        }
        self.close_transport();
    }

    /// Closes the transport and cancels every timer.
    pub(crate) fn close_transport(&mut self) {
        self.keepalive = None;
        self.reconnect_timer = None;
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }

    /// Removes every operation, in insertion order.
    pub(crate) fn take_operations(&mut self) -> Vec<Operation> {
        self.operations.drain()
    }
}
