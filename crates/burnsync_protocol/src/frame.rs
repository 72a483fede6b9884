//! JSON-RPC 2.0 framing.
//!
//! Every WebSocket text message is exactly one frame. Requests carry an
//! `id` when a reply is expected; notifications omit it. Replies echo the
//! `id` and carry either `result` or `error`.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::RemoteRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Request id; `None` for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Method name.
    pub method: String,
    /// Method params.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestFrame {
    /// Builds a request frame with an id.
    pub fn call(id: u64, request: &RemoteRequest) -> ProtocolResult<Self> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            method: request.method().into(),
            params: request.params()?,
        })
    }

    /// Builds a notification frame (no id, no reply).
    pub fn notification(request: &RemoteRequest) -> ProtocolResult<Self> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: None,
            method: request.method().into(),
            params: request.params()?,
        })
    }

    /// Encodes to JSON text.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request this answers.
    #[serde(default)]
    pub id: Option<u64>,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure. Either a string or a `{code, message}` object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl ResponseFrame {
    /// Creates a successful response.
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id),
            result: None,
            error: Some(Value::String(message.into())),
        }
    }

    /// Splits the response into its result or a remote error.
    pub fn into_result(self) -> ProtocolResult<Value> {
        if let Some(error) = self.error {
            return Err(remote_error(error));
        }
        self.result.ok_or(ProtocolError::MissingResult(self.id))
    }

    /// Encodes to JSON text.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn remote_error(error: Value) -> ProtocolError {
    match error {
        Value::String(message) => ProtocolError::Remote {
            code: None,
            message,
        },
        Value::Object(ref map) => ProtocolError::Remote {
            code: map.get("code").and_then(Value::as_i64),
            message: map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        },
        other => ProtocolError::Remote {
            code: None,
            message: other.to_string(),
        },
    }
}

/// A decoded incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// The peer sent a request or notification.
    Request(RequestFrame),
    /// The peer answered one of our requests.
    Response(ResponseFrame),
}

impl Incoming {
    /// Decodes one text frame.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let map = value
            .as_object()
            .ok_or_else(|| ProtocolError::invalid_frame("expected object"))?;

        match map.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(ProtocolError::invalid_frame(format!(
                    "unsupported jsonrpc version: {other}"
                )))
            }
            None => return Err(ProtocolError::invalid_frame("missing jsonrpc version")),
        }

        if map.contains_key("method") {
            Ok(Incoming::Request(serde_json::from_value(value)?))
        } else if map.contains_key("result") || map.contains_key("error") {
            Ok(Incoming::Response(serde_json::from_value(value)?))
        } else {
            Err(ProtocolError::invalid_frame(
                "neither a request nor a response",
            ))
        }
    }
}
