//! JSON wire protocol for checklist synchronization.
//!
//! Every frame is a WebSocket text message holding one JSON object:
//! ```text
//! client → server   {"id"?: 7, "module": "check-list", "command": "addItem", "params": {...}}
//! server → client   {"responseId": 7, "success": true, "data": "9f0c..."}
//! server → client   {"module": "check-list", "checkListId": "...", "command": "addItem", "params": {...}}
//! ```
//!
//! Requests without an `id` are fire-and-forget and get no response.

use checklist_core::{Broadcast, Command};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Module name carried by every checklist frame.
pub const MODULE: &str = "check-list";

/// Client → server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id; present only when a response is wanted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub module: String,
    #[serde(flatten)]
    pub command: Command,
}

impl Request {
    pub fn new(id: Option<u64>, command: Command) -> Self {
        Self {
            id,
            module: MODULE.to_string(),
            command,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Server → client reply to a request that carried an `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub response_id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(response_id: u64, data: Option<Value>) -> Self {
        Self {
            response_id,
            success: true,
            data,
            error: None,
        }
    }

    pub fn err(response_id: u64, error: impl Into<String>) -> Self {
        Self {
            response_id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// The payload of a successful response, or the server's rejection.
    pub fn into_result(self) -> Result<Option<Value>, ProtocolError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ProtocolError::Rejected(
                self.error.unwrap_or_else(|| "request rejected".to_string()),
            ))
        }
    }
}

/// Server → client broadcast for one checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub module: String,
    pub check_list_id: String,
    #[serde(flatten)]
    pub broadcast: Broadcast,
}

impl Notification {
    pub fn new(check_list_id: impl Into<String>, broadcast: Broadcast) -> Self {
        Self {
            module: MODULE.to_string(),
            check_list_id: check_list_id.into(),
            broadcast,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }
}

/// Anything the server can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Response(Response),
    Notification(Notification),
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        match self {
            ServerMessage::Response(response) => serde_json::to_string(response)
                .map_err(|e| ProtocolError::SerializationError(e.to_string())),
            ServerMessage::Notification(notification) => notification.encode(),
        }
    }

    /// Frames with a `responseId` are responses; everything else is a broadcast.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        let message = if value.get("responseId").is_some() {
            serde_json::from_value(value).map(ServerMessage::Response)
        } else {
            serde_json::from_value(value).map(ServerMessage::Notification)
        };
        message.map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    NotConnected,
    /// The server answered `success: false` (unknown checklist, not allowed, ...).
    Rejected(String),
    /// A response whose payload does not have the expected shape.
    UnexpectedReply(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::Rejected(e) => write!(f, "Request rejected: {e}"),
            Self::UnexpectedReply(e) => write!(f, "Unexpected reply: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
