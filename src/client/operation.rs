//! Operations and the per-connection operation table.
//!
//! The table is the source of truth for what a connection is subscribed
//! to. Every callback invocation goes through [`Operation::notify`].

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::identifiers::OperationId;
use crate::protocol::ClientMessage;

// ============================================================================
// Types
// ============================================================================

/// Subscription callback.
///
/// Receives every [`Update`] for one operation. Never receives a panic or
/// an `Err` from the engine: failures arrive as update variants.
pub type UpdateHandler = Arc<dyn Fn(Update) + Send + Sync>;

// ============================================================================
// Update
// ============================================================================

/// Why a connection went away.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// Transport closed by the server or the network.
    Remote {
        /// Close code, if any.
        code: Option<u16>,
        /// Close reason (may be empty).
        reason: String,
    },
    /// No keepalive within the configured window.
    KeepaliveTimeout,
    /// Server sent a message the client does not accept.
    Protocol(String),
    /// Server answered the handshake with `connection_error`.
    ConnectionRejected(Value),
    /// Transport could not be re-established.
    Unreachable(String),
    /// Closed by the caller.
    Released,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote {
                code: Some(code),
                reason,
            } => write!(f, "closed by remote ({code}) {reason}"),
            Self::Remote { code: None, reason } => write!(f, "closed by remote {reason}"),
            Self::KeepaliveTimeout => f.write_str("keepalive timeout"),
            Self::Protocol(message) => write!(f, "protocol error: {message}"),
            Self::ConnectionRejected(payload) => write!(f, "connection rejected: {payload}"),
            Self::Unreachable(message) => write!(f, "unreachable: {message}"),
            Self::Released => f.write_str("released"),
        }
    }
}

/// What a subscription callback receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Accumulated results, oldest first.
    Data(Vec<Value>),
    /// GraphQL-level errors from the server.
    GraphQLError(Value),
    /// A frame on this operation's connection could not be parsed.
    ParseError(String),
    /// The transport reported an error; the operation stays registered.
    TransportError(String),
    /// A message for this operation could not be sent.
    Unavailable(String),
    /// The server completed the operation.
    Complete,
    /// Connection lost; a reconnect is scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Connection gone; the operation has been removed.
    Closed(CloseReason),
}

// ============================================================================
// Operation
// ============================================================================

/// Lifecycle of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    /// `start` not yet sent.
    Queued,
    /// `start` sent.
    Started,
    /// Server sent `complete`.
    Complete,
    /// Server sent `error`, or the start could not be sent.
    Failed,
}

/// One subscription multiplexed on a connection.
pub struct Operation {
    id: OperationId,
    query: String,
    variables: Value,
    handler: UpdateHandler,
    status: OperationStatus,
    history: VecDeque<Value>,
    seq: u64,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("variables", &self.variables)
            .field("status", &self.status)
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl Operation {
    /// Creates a queued operation.
    #[must_use]
    pub fn new(
        id: OperationId,
        query: impl Into<String>,
        variables: Value,
        handler: UpdateHandler,
    ) -> Self {
        Self {
            id,
            query: query.into(),
            variables,
            handler,
            status: OperationStatus::Queued,
            history: VecDeque::new(),
            seq: 0,
        }
    }

    /// Operation identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Current status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// Accumulated results, oldest first.
    #[inline]
    pub fn history(&self) -> impl Iterator<Item = &Value> {
        self.history.iter()
    }

    pub(crate) fn into_handler(self) -> UpdateHandler {
        self.handler
    }

    pub(crate) fn set_status(&mut self, status: OperationStatus) {
        self.status = status;
    }

    /// Builds this operation's `start` message.
    #[must_use]
    pub fn start_message(&self) -> ClientMessage {
        ClientMessage::start(self.id.clone(), self.query.clone(), self.variables.clone())
    }

    /// Invokes the callback.
    #[inline]
    pub fn notify(&self, update: Update) {
        (self.handler)(update);
    }

    /// Appends a result, keeping at most `limit`, and returns the snapshot.
    pub(crate) fn push_result(&mut self, value: Value, limit: usize) -> Update {
        self.history.push_back(value);
        while self.history.len() > limit {
            self.history.pop_front();
        }
        Update::Data(self.history.iter().cloned().collect())
    }
}

// ============================================================================
// OperationTable
// ============================================================================

/// Operations on one connection, keyed by identity.
///
/// Iteration order is insertion order so that replays and flushes keep the
/// order in which the caller subscribed.
#[derive(Debug, Default)]
pub struct OperationTable {
    entries: FxHashMap<OperationId, Operation>,
    next_seq: u64,
}

impl OperationTable {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no operations remain.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `id` is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &OperationId) -> bool {
        self.entries.contains_key(id)
    }

    /// Looks up an operation.
    #[inline]
    #[must_use]
    pub fn get(&self, id: &OperationId) -> Option<&Operation> {
        self.entries.get(id)
    }

    /// Looks up an operation mutably.
    #[inline]
    pub fn get_mut(&mut self, id: &OperationId) -> Option<&mut Operation> {
        self.entries.get_mut(id)
    }

    /// Inserts a new operation. Returns `false` (and leaves the table
    /// untouched) if the identity is already present.
    pub fn insert(&mut self, mut operation: Operation) -> bool {
        if self.entries.contains_key(&operation.id) {
            return false;
        }

        operation.seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(operation.id.clone(), operation);
        true
    }

    /// Swaps the callback of an existing operation.
    pub fn replace_handler(&mut self, id: &OperationId, handler: UpdateHandler) -> bool {
        match self.entries.get_mut(id) {
            Some(operation) => {
                operation.handler = handler;
                true
            }
            None => false,
        }
    }

    /// Removes an operation.
    #[inline]
    pub fn remove(&mut self, id: &OperationId) -> Option<Operation> {
        self.entries.remove(id)
    }

    /// Operations in insertion order.
    #[must_use]
    pub fn ordered(&self) -> Vec<&Operation> {
        let mut operations: Vec<&Operation> = self.entries.values().collect();
        operations.sort_by_key(|operation| operation.seq);
        operations
    }

    /// Marks every operation as queued again (after a lost transport).
    pub fn requeue_all(&mut self) {
        for operation in self.entries.values_mut() {
            operation.status = OperationStatus::Queued;
        }
    }

    /// Delivers an update to every operation, in insertion order.
    pub fn broadcast(&self, update: &Update) {
        for operation in self.ordered() {
            operation.notify(update.clone());
        }
    }

    /// Empties the table, returning operations in insertion order.
    pub fn drain(&mut self) -> Vec<Operation> {
        let mut operations: Vec<Operation> = self.entries.drain().map(|(_, op)| op).collect();
        operations.sort_by_key(|operation| operation.seq);
        operations
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (UpdateHandler, Arc<Mutex<Vec<Update>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        (Arc::new(move |u: Update| seen_clone.lock().push(u)), seen)
    }

    fn op(id: &str, handler: UpdateHandler) -> Operation {
        Operation::new(OperationId::from_wire(id), "subscription{m}", json!({}), handler)
    }

    #[test]
    fn test_new_operation_is_queued() {
        let (handler, _) = recorder();
        let operation = op("a", handler);
        assert_eq!(operation.status(), OperationStatus::Queued);
        assert_eq!(operation.history().count(), 0);
    }

    #[test]
    fn test_history_is_bounded_oldest_first() {
        let (handler, _) = recorder();
        let mut operation = op("a", handler);

        operation.push_result(json!(1), 2);
        operation.push_result(json!(2), 2);
        let update = operation.push_result(json!(3), 2);

        assert_eq!(update, Update::Data(vec![json!(2), json!(3)]));
    }

    #[test]
    fn test_insert_does_not_duplicate() {
        let (handler, _) = recorder();
        let mut table = OperationTable::new();

        assert!(table.insert(op("a", Arc::clone(&handler))));
        assert!(!table.insert(op("a", handler)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_falsy_looking_ids_are_present() {
        let (handler, _) = recorder();
        let mut table = OperationTable::new();
        table.insert(op("0", Arc::clone(&handler)));
        table.insert(op("", handler));

        assert!(table.contains(&OperationId::from_wire("0")));
        assert!(table.remove(&OperationId::from_wire("")).is_some());
        assert!(!table.is_empty());
    }

    #[test]
    fn test_ordered_and_drain_keep_insertion_order() {
        let (handler, _) = recorder();
        let mut table = OperationTable::new();
        for id in ["z", "a", "m"] {
            table.insert(op(id, Arc::clone(&handler)));
        }

        let order: Vec<_> = table.ordered().iter().map(|o| o.id().to_string()).collect();
        assert_eq!(order, ["z", "a", "m"]);

        let drained: Vec<_> = table.drain().into_iter().map(|o| o.id().to_string()).collect();
        assert_eq!(drained, ["z", "a", "m"]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_replace_handler() {
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();
        let mut table = OperationTable::new();
        table.insert(op("a", first));

        assert!(table.replace_handler(&OperationId::from_wire("a"), second));
        table.broadcast(&Update::Complete);

        assert!(first_seen.lock().is_empty());
        assert_eq!(*second_seen.lock(), vec![Update::Complete]);
    }

    #[test]
    fn test_requeue_all() {
        let (handler, _) = recorder();
        let mut table = OperationTable::new();
        table.insert(op("a", handler));
        let id = OperationId::from_wire("a");
        table.get_mut(&id).unwrap().set_status(OperationStatus::Started);

        table.requeue_all();
        assert_eq!(table.get(&id).unwrap().status(), OperationStatus::Queued);
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::KeepaliveTimeout.to_string(), "keepalive timeout");
        assert_eq!(
            CloseReason::Remote {
                code: Some(1001),
                reason: "bye".into()
            }
            .to_string(),
            "closed by remote (1001) bye"
        );
    }
}
