/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! JSON-RPC 2.0 message types exchanged with the language server.

use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error code for an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

/// A request: has both `id` and `method`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RequestMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters; omitted on the wire when null.
    #[serde(default = "default_null", skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

/// A response: has `id` and no `method`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResponseMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request this answers (`null` if the request was unreadable).
    pub id: Option<RequestId>,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// A notification: has `method` and no `id`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NotificationMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters; omitted on the wire when null.
    #[serde(default = "default_null", skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

/// JSON-RPC request id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id (what this client allocates).
    Number(i64),
    /// String id (some servers use these for their own requests).
    String(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResponseError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional extra data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Why an inbound JSON value is not a JSON-RPC message.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The payload is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// The payload is JSON but has neither `id` nor `method`.
    #[error("message has neither id nor method")]
    Unclassified,
}

/// One decoded JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Server-initiated request.
    Request(RequestMessage),
    /// Response to one of our requests.
    Response(ResponseMessage),
    /// Notification (e.g. `textDocument/publishDiagnostics`, `$/progress`).
    Notification(NotificationMessage),
}

impl Message {
    /// Decodes a frame payload.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for malformed JSON or an unclassifiable
    /// object.
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        Self::from_value(serde_json::from_slice(payload)?)
    }

    /// Classifies a JSON object by the presence of `id` and `method`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the object does not fit its class.
    pub fn from_value(value: serde_json::Value) -> Result<Self, DecodeError> {
        let has_method = value.get("method").is_some_and(serde_json::Value::is_string);
        let has_id = value.get("id").is_some();

        match (has_id, has_method) {
            (true, true) => Ok(Self::Request(serde_json::from_value(value)?)),
            (false, true) => Ok(Self::Notification(serde_json::from_value(value)?)),
            (true, false) => Ok(Self::Response(serde_json::from_value(value)?)),
            (false, false) => Err(DecodeError::Unclassified),
        }
    }

    /// Method name of a request or notification.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// Id of a request or response.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => r.id.as_ref(),
            Self::Notification(_) => None,
        }
    }

    /// Returns the response if this is the answer to `id`.
    #[must_use]
    pub fn response_to(&self, id: &RequestId) -> Option<&ResponseMessage> {
        match self {
            Self::Response(r) if r.id.as_ref() == Some(id) => Some(r),
            _ => None,
        }
    }

    /// Returns the params if this is a notification for `method`.
    #[must_use]
    pub fn notification_params(&self, method: &str) -> Option<&serde_json::Value> {
        match self {
            Self::Notification(n) if n.method == method => Some(&n.params),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Tests use unwrap/expect/panic for clear failure messages"
)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_number() {
        let json = r#"{"jsonrpc":"2.0","id":42,"method":"test"}"#;
        let msg: RequestMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, RequestId::Number(42));
    }

    #[test]
    fn test_request_id_string() {
        let json = r#"{"jsonrpc":"2.0","id":"abc-123","method":"test"}"#;
        let msg: RequestMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, RequestId::String("abc-123".to_string()));
    }

    #[test]
    fn test_classify_response_with_result() {
        let json = br#"{"jsonrpc":"2.0","id":1,"result":{"capabilities":{}}}"#;
        let Message::Response(msg) = Message::from_slice(json).unwrap() else {
            panic!("expected response");
        };
        assert!(msg.result.is_some());
        assert!(msg.error.is_none());
    }

    #[test]
    fn test_classify_response_with_error() {
        let json = br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid Request"}}"#;
        let Message::Response(msg) = Message::from_slice(json).unwrap() else {
            panic!("expected response");
        };
        assert!(msg.result.is_none());
        assert_eq!(msg.error.unwrap().code, -32600);
    }

    #[test]
    fn test_classify_notification() {
        let json = br#"{"jsonrpc":"2.0","method":"$/progress","params":{"token":"t"}}"#;
        let msg = Message::from_slice(json).unwrap();
        assert!(matches!(msg, Message::Notification(_)));
        assert_eq!(msg.method(), Some("$/progress"));
        assert!(msg.id().is_none());
        assert!(msg.notification_params("$/progress").is_some());
        assert!(msg.notification_params("other").is_none());
    }

    #[test]
    fn test_classify_server_request() {
        let json = br#"{"jsonrpc":"2.0","id":"w1","method":"window/workDoneProgress/create","params":{"token":"x"}}"#;
        let msg = Message::from_slice(json).unwrap();
        assert!(matches!(msg, Message::Request(_)));
        assert_eq!(msg.id(), Some(&RequestId::String("w1".to_string())));
    }

    #[test]
    fn test_classify_rejects_bare_object() {
        let err = Message::from_slice(br#"{"jsonrpc":"2.0"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Unclassified));
    }

    #[test]
    fn test_classify_rejects_malformed_json() {
        let err = Message::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_response_to_matches_only_its_id() {
        let msg = Message::from_slice(br#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        assert!(msg.response_to(&RequestId::Number(3)).is_some());
        assert!(msg.response_to(&RequestId::Number(4)).is_none());
    }

    #[test]
    fn test_notification_serializes_without_id() {
        let msg = Message::Notification(NotificationMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: "exit".to_string(),
            params: serde_json::Value::Null,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("params").is_none());
        assert_eq!(value["method"], "exit");
    }

    #[test]
    fn test_request_without_params_omits_field() {
        let request = RequestMessage {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Number(2),
            method: "shutdown".to_string(),
            params: serde_json::Value::Null,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("params").is_none());

        let parsed = Message::from_slice(&serde_json::to_vec(&request).unwrap()).unwrap();
        assert!(matches!(parsed, Message::Request(r) if r.params.is_null()));
    }
}
