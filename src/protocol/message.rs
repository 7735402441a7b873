//! Outbound and inbound message types.
//!
//! Outbound messages are a closed enum serialized with an internal `type`
//! tag. Inbound frames are parsed into [`ServerMessage`], which maps every
//! type the client does not expect to [`ServerMessage::Unexpected`] so the
//! caller has to handle it explicitly.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, from_str, to_string};

use crate::error::{Error, Result};
use crate::identifiers::OperationId;

// ============================================================================
// Constants
// ============================================================================

/// WebSocket sub-protocol name sent on the upgrade request.
pub const SUB_PROTOCOL: &str = "graphql-ws";

// ============================================================================
// MessageType
// ============================================================================

/// Every message type of the sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// `connection_init`
    ConnectionInit,
    /// `connection_ack`
    ConnectionAck,
    /// `connection_error`
    ConnectionError,
    /// `ka`
    KeepAlive,
    /// `connection_terminate`
    ConnectionTerminate,
    /// `start`
    Start,
    /// `data`
    Data,
    /// `error`
    Error,
    /// `complete`
    Complete,
    /// `stop`
    Stop,
}

impl MessageType {
    /// All message types.
    pub const ALL: [Self; 10] = [
        Self::ConnectionInit,
        Self::ConnectionAck,
        Self::ConnectionError,
        Self::KeepAlive,
        Self::ConnectionTerminate,
        Self::Start,
        Self::Data,
        Self::Error,
        Self::Complete,
        Self::Stop,
    ];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionInit => "connection_init",
            Self::ConnectionAck => "connection_ack",
            Self::ConnectionError => "connection_error",
            Self::KeepAlive => "ka",
            Self::ConnectionTerminate => "connection_terminate",
            Self::Start => "start",
            Self::Data => "data",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Stop => "stop",
        }
    }

    /// Looks up a wire name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.as_str() == name)
    }

}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ClientMessage
// ============================================================================

/// Payload of a `start` message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartPayload {
    /// Subscription document.
    pub query: String,
    /// Operation variables.
    pub variables: Value,
}

/// A message from client to server.
///
/// # Format
///
/// ```json
/// { "id": "…", "type": "start", "payload": { "query": "…", "variables": {} } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Opens the handshake.
    #[serde(rename = "connection_init")]
    ConnectionInit {
        /// Connection parameters (empty object).
        payload: Value,
    },

    /// Starts an operation.
    #[serde(rename = "start")]
    Start {
        /// Operation identity.
        id: OperationId,
        /// Query and variables.
        payload: StartPayload,
    },

    /// Stops an operation.
    #[serde(rename = "stop")]
    Stop {
        /// Operation identity.
        id: OperationId,
    },

    /// Keepalive echo.
    #[serde(rename = "ka")]
    KeepAlive,

    /// Graceful close.
    #[serde(rename = "connection_terminate")]
    ConnectionTerminate,
}

impl ClientMessage {
    /// Creates a `connection_init` with an empty payload.
    #[inline]
    #[must_use]
    pub fn connection_init() -> Self {
        Self::ConnectionInit {
            payload: Value::Object(Map::new()),
        }
    }

    /// Creates a `start` for an operation.
    #[inline]
    #[must_use]
    pub fn start(id: OperationId, query: impl Into<String>, variables: Value) -> Self {
        Self::Start {
            id,
            payload: StartPayload {
                query: query.into(),
                variables,
            },
        }
    }

    /// Creates a `stop` for an operation.
    #[inline]
    #[must_use]
    pub fn stop(id: OperationId) -> Self {
        Self::Stop { id }
    }

    /// Returns the wire type.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::ConnectionInit { .. } => MessageType::ConnectionInit,
            Self::Start { .. } => MessageType::Start,
            Self::Stop { .. } => MessageType::Stop,
            Self::KeepAlive => MessageType::KeepAlive,
            Self::ConnectionTerminate => MessageType::ConnectionTerminate,
        }
    }

    /// Returns the operation this message belongs to, if any.
    #[must_use]
    pub fn operation_id(&self) -> Option<&OperationId> {
        match self {
            Self::Start { id, .. } | Self::Stop { id } => Some(id),
            _ => None,
        }
    }

    /// Serializes to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_frame(&self) -> Result<String> {
        Ok(to_string(self)?)
    }
}

// ============================================================================
// ServerMessage
// ============================================================================

/// Raw frame before type dispatch.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// A message from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Handshake accepted.
    ConnectionAck,

    /// Handshake rejected.
    ConnectionError {
        /// Server-supplied reason.
        payload: Value,
    },

    /// Keepalive heartbeat.
    KeepAlive,

    /// Result for an operation.
    Data {
        /// Operation identity.
        id: OperationId,
        /// `{ data, errors? }`.
        payload: Value,
    },

    /// GraphQL-level failure for an operation.
    Error {
        /// Operation identity.
        id: OperationId,
        /// Server-supplied errors.
        payload: Value,
    },

    /// Operation finished.
    Complete {
        /// Operation identity.
        id: OperationId,
    },

    /// A type the client does not accept: unknown, or client-only.
    Unexpected {
        /// The wire `type` as received.
        kind: String,
    },
}

impl ServerMessage {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Parse`] if the frame is not a JSON object with a string `type`
    /// - [`Error::Protocol`] if a per-operation message carries no `id`
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: Envelope =
            from_str(text).map_err(|e| Error::parse(format!("{e}: {text}")))?;

        let Some(ty) = MessageType::from_wire(&envelope.kind) else {
            return Ok(Self::Unexpected {
                kind: envelope.kind,
            });
        };

        let message = match ty {
            MessageType::ConnectionAck => Self::ConnectionAck,
            MessageType::ConnectionError => Self::ConnectionError {
                payload: envelope.payload,
            },
            MessageType::KeepAlive => Self::KeepAlive,
            MessageType::Data => Self::Data {
                id: Self::require_id(ty, envelope.id)?,
                payload: envelope.payload,
            },
            MessageType::Error => Self::Error {
                id: Self::require_id(ty, envelope.id)?,
                payload: envelope.payload,
            },
            MessageType::Complete => Self::Complete {
                id: Self::require_id(ty, envelope.id)?,
            },
            MessageType::ConnectionInit
            | MessageType::ConnectionTerminate
            | MessageType::Start
            | MessageType::Stop => Self::Unexpected {
                kind: envelope.kind,
            },
        };

        Ok(message)
    }

    fn require_id(ty: MessageType, id: Option<String>) -> Result<OperationId> {
        id.map(OperationId::from_wire)
            .ok_or_else(|| Error::protocol(format!("`{ty}` message without id")))
    }
}

// ============================================================================
// DataResult
// ============================================================================

/// What a `data` payload carries for the subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum DataResult {
    /// A result to append to the operation's history.
    Value(Value),
    /// No data, only errors.
    Errors(Value),
}

impl DataResult {
    /// Extracts the subscriber-facing result from a `data` payload.
    ///
    /// An object with exactly one top-level field yields that field's value;
    /// anything else yields the `data` value itself.
    #[must_use]
    pub fn from_payload(payload: Value) -> Self {
        let (data, errors) = match payload {
            Value::Object(mut map) => (
                map.remove("data").unwrap_or(Value::Null),
                map.remove("errors"),
            ),
            other => (other, None),
        };

        match data {
            Value::Null => match errors {
                Some(errors) => Self::Errors(errors),
                None => Self::Value(Value::Null),
            },
            Value::Object(map) if map.len() == 1 => {
                Self::Value(map.into_iter().next().map_or(Value::Null, |(_, v)| v))
            }
            other => Self::Value(other),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_message_type_round_names() {
        for ty in MessageType::ALL {
            assert_eq!(MessageType::from_wire(ty.as_str()), Some(ty));
        }
        assert_eq!(MessageType::from_wire("keepalive"), None);
    }

    #[test]
    fn test_connection_init_frame() {
        let frame = ClientMessage::connection_init().to_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({ "type": "connection_init", "payload": {} }));
    }

    #[test]
    fn test_start_frame() {
        let id = OperationId::from_wire("a.b.0");
        let frame = ClientMessage::start(id, "subscription{m{id}}", json!({ "x": 1 }))
            .to_frame()
            .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "start",
                "id": "a.b.0",
                "payload": { "query": "subscription{m{id}}", "variables": { "x": 1 } }
            })
        );
    }

    #[test]
    fn test_payloadless_frames() {
        let ka = ClientMessage::KeepAlive.to_frame().unwrap();
        assert_eq!(ka, r#"{"type":"ka"}"#);

        let term = ClientMessage::ConnectionTerminate.to_frame().unwrap();
        assert_eq!(term, r#"{"type":"connection_terminate"}"#);

        let stop = ClientMessage::stop(OperationId::from_wire("x")).to_frame().unwrap();
        assert_eq!(stop, r#"{"type":"stop","id":"x"}"#);
    }

    #[test]
    fn test_parse_ack_and_ka() {
        assert_eq!(
            ServerMessage::parse(r#"{"type":"connection_ack"}"#).unwrap(),
            ServerMessage::ConnectionAck
        );
        assert_eq!(
            ServerMessage::parse(r#"{"type":"ka"}"#).unwrap(),
            ServerMessage::KeepAlive
        );
    }

    #[test]
    fn test_parse_data() {
        let msg =
            ServerMessage::parse(r#"{"id":"1","type":"data","payload":{"data":{"m":{"id":"1"}}}}"#)
                .unwrap();

        assert_eq!(
            msg,
            ServerMessage::Data {
                id: OperationId::from_wire("1"),
                payload: json!({ "data": { "m": { "id": "1" } } }),
            }
        );
    }

    #[test]
    fn test_parse_unknown_and_client_only() {
        assert_eq!(
            ServerMessage::parse(r#"{"type":"subscription_data"}"#).unwrap(),
            ServerMessage::Unexpected {
                kind: "subscription_data".into()
            }
        );
        assert_eq!(
            ServerMessage::parse(r#"{"type":"start","id":"1"}"#).unwrap(),
            ServerMessage::Unexpected {
                kind: "start".into()
            }
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            ServerMessage::parse("{not json"),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            ServerMessage::parse(r#"{"id":"1"}"#),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_missing_id() {
        assert!(matches!(
            ServerMessage::parse(r#"{"type":"complete"}"#),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_data_result_single_field() {
        let result = DataResult::from_payload(json!({ "data": { "m": { "id": "1" } } }));
        assert_eq!(result, DataResult::Value(json!({ "id": "1" })));
    }

    #[test]
    fn test_data_result_multiple_fields() {
        let result = DataResult::from_payload(json!({ "data": { "a": 1, "b": 2 } }));
        assert_eq!(result, DataResult::Value(json!({ "a": 1, "b": 2 })));
    }

    #[test]
    fn test_data_result_errors_only() {
        let result =
            DataResult::from_payload(json!({ "data": null, "errors": [{ "message": "boom" }] }));
        assert_eq!(result, DataResult::Errors(json!([{ "message": "boom" }])));
    }
}
