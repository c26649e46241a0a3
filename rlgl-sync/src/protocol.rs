//! JSON wire protocol between pushing clients and the server.
//!
//! Every frame, in both directions, has the same shape:
//! ```text
//! { "type": "push" | "ping" | "ack" | "pong" | "error",
//!   "client_id": "...",
//!   "document": { ... },      // push only
//!   "error": "..." }          // error only
//! ```
//!
//! Client → server: `push`, `ping`. Server → client: `ack`, `pong`, `error`.
//! Each inbound frame gets exactly one outbound frame.

use serde::{Deserialize, Serialize};

use crate::document::StatusDocument;

/// Error text for frames whose `type` the server does not handle.
pub const UNKNOWN_TYPE_ERROR: &str = "unknown message type";

/// Known message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Client stores a document
    Push,
    /// Client liveness check
    Ping,
    /// Server accepted a push
    Ack,
    /// Server answer to a ping
    Pong,
    /// Server rejected a frame
    Error,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Ping => "ping",
            Self::Ack => "ack",
            Self::Pong => "pong",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "push" => Some(Self::Push),
            "ping" => Some(Self::Ping),
            "ack" => Some(Self::Ack),
            "pong" => Some(Self::Pong),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A protocol frame as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<StatusDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Frame {
    fn new(kind: MessageType, client_id: impl Into<String>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            client_id: client_id.into(),
            document: None,
            error: None,
        }
    }

    /// Create a push carrying `document`.
    pub fn push(client_id: impl Into<String>, document: StatusDocument) -> Self {
        Self {
            document: Some(document),
            ..Self::new(MessageType::Push, client_id)
        }
    }

    /// Create a ping.
    pub fn ping(client_id: impl Into<String>) -> Self {
        Self::new(MessageType::Ping, client_id)
    }

    /// Create an ack for a stored push.
    pub fn ack(client_id: impl Into<String>) -> Self {
        Self::new(MessageType::Ack, client_id)
    }

    /// Create a pong.
    pub fn pong(client_id: impl Into<String>) -> Self {
        Self::new(MessageType::Pong, client_id)
    }

    /// Create an error response.
    pub fn error(client_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(MessageType::Error, client_id)
        }
    }

    /// The frame's type, if it is one of the known ones.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.kind)
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Loose view of an inbound frame: the document is kept raw so a bad
/// document can be answered with an error instead of dropping the frame.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    document: Option<serde_json::Value>,
}

/// An inbound frame as the server dispatches it.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Push {
        client_id: String,
        document: StatusDocument,
    },
    Ping {
        client_id: String,
    },
    /// A type the server does not handle.
    Unknown {
        client_id: String,
        kind: String,
    },
    /// A push whose document is missing or does not parse.
    Invalid {
        client_id: String,
        reason: String,
    },
}

impl Inbound {
    /// Decode a client frame.
    ///
    /// Fails only when the text is not a JSON object with a string `type`;
    /// that is a framing error and ends the session.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        let Envelope {
            kind,
            client_id,
            document,
        } = envelope;

        let inbound = match MessageType::parse(&kind) {
            Some(MessageType::Push) => match document {
                Some(value) => match serde_json::from_value(value) {
                    Ok(document) => Inbound::Push {
                        client_id,
                        document,
                    },
                    Err(e) => Inbound::Invalid {
                        client_id,
                        reason: format!("invalid document: {e}"),
                    },
                },
                None => Inbound::Invalid {
                    client_id,
                    reason: "missing document".to_string(),
                },
            },
            Some(MessageType::Ping) => Inbound::Ping { client_id },
            _ => Inbound::Unknown { client_id, kind },
        };
        Ok(inbound)
    }

    pub fn client_id(&self) -> &str {
        match self {
            Self::Push { client_id, .. }
            | Self::Ping { client_id }
            | Self::Unknown { client_id, .. }
            | Self::Invalid { client_id, .. } => client_id,
        }
    }

    /// Wire name of the frame type, for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::Push { .. } | Self::Invalid { .. } => MessageType::Push.as_str(),
            Self::Ping { .. } => MessageType::Ping.as_str(),
            Self::Unknown { kind, .. } => kind,
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Encode(String),
    #[error("deserialization error: {0}")]
    Decode(String),
    #[error("connection closed")]
    ConnectionClosed,
}
