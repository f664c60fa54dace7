// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! RPC envelopes carried over the message queue.
//!
//! Inbound bodies are UTF-8 JSON `{method, params, id}`. Replies are only
//! published when the delivery carried a reply address and correlation id,
//! as `{result, error, id, elapsed}` with `error` either `{code, message}`,
//! `{message}` or null.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fatal/unclassified failure. Deliberately opaque to the caller.
pub const ERROR_FATAL: i64 = -32000;
/// A deadline-guarded backend call outlived its deadline.
pub const ERROR_TIMEOUT: i64 = -32001;
/// Request body was not a parsable RPC envelope.
pub const ERROR_INVALID_REQUEST: i64 = -32600;
/// Method name not present in the schema model.
pub const ERROR_UNKNOWN_METHOD: i64 = -32601;

/// One inbound RPC call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: Value) -> Self {
        Self {
            method: method.into(),
            params,
            id,
        }
    }

    /// Parse a queue delivery body. The body must be a JSON object with at
    /// least a string `method`.
    pub fn from_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Optional `user_hash` param, the caller-supplied secret that blob
    /// ownership is derived from.
    pub fn user_hash(&self) -> Option<&str> {
        self.params.get("user_hash").and_then(Value::as_str)
    }
}

/// Error half of a reply. `code` is omitted from the wire form for
/// validation-style errors that carry only a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
}

impl RpcError {
    /// Message-only error, the shape used for validation warnings and
    /// marshalling failures.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Coded error.
    pub fn coded(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn fatal() -> Self {
        Self::coded(ERROR_FATAL, "fatal error")
    }

    pub fn timeout() -> Self {
        Self::coded(ERROR_TIMEOUT, "Server timed out")
    }

    pub fn invalid_request() -> Self {
        Self::coded(ERROR_INVALID_REQUEST, "invalid request")
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::coded(ERROR_UNKNOWN_METHOD, format!("unknown method: {method}"))
    }
}

/// One outbound reply. `error` is serialized even when null so callers can
/// distinguish "no error" from a truncated payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcResponse {
    pub result: Value,
    pub error: Option<RpcError>,
    pub id: Value,
    /// Wall-clock milliseconds between delivery receipt and reply.
    pub elapsed: u64,
}

impl RpcResponse {
    pub fn ok(result: Value, id: Value, elapsed: u64) -> Self {
        Self {
            result,
            error: None,
            id,
            elapsed,
        }
    }

    pub fn error(error: RpcError, id: Value, elapsed: u64) -> Self {
        Self {
            result: Value::Null,
            error: Some(error),
            id,
            elapsed,
        }
    }

    pub fn to_body(&self) -> Vec<u8> {
        // Serialization of these envelope types cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ========== RpcRequest Tests ==========

    #[test]
    fn test_request_from_body() {
        let body = br#"{"method":"ping","params":{"user_hash":"abc"},"id":"1"}"#;
        let req = RpcRequest::from_body(body).unwrap();
        assert_eq!(req.method, "ping");
        assert_eq!(req.params, json!({"user_hash": "abc"}));
        assert_eq!(req.id, json!("1"));
    }

    #[test]
    fn test_request_defaults_params_and_id() {
        let req = RpcRequest::from_body(br#"{"method":"ping"}"#).unwrap();
        assert_eq!(req.params, Value::Null);
        assert_eq!(req.id, Value::Null);
    }

    #[test]
    fn test_request_rejects_garbage() {
        assert!(RpcRequest::from_body(b"not json").is_err());
        assert!(RpcRequest::from_body(br#"{"params":{}}"#).is_err());
    }

    #[test]
    fn test_request_user_hash() {
        let req = RpcRequest::new("ping", json!({"user_hash": "abc"}), json!("1"));
        assert_eq!(req.user_hash(), Some("abc"));

        let req = RpcRequest::new("ping", json!({}), json!("1"));
        assert_eq!(req.user_hash(), None);

        let req = RpcRequest::new("ping", json!({"user_hash": 7}), json!("1"));
        assert_eq!(req.user_hash(), None);
    }

    // ========== RpcError Tests ==========

    #[test]
    fn test_error_message_only_omits_code() {
        let err = RpcError::message("missing mandatory field: qty");
        let wire = serde_json::to_string(&err).unwrap();
        assert!(!wire.contains("code"));
        assert!(wire.contains("missing mandatory field: qty"));
    }

    #[test]
    fn test_error_coded_includes_code() {
        let err = RpcError::timeout();
        let wire = serde_json::to_value(&err).unwrap();
        assert_eq!(wire["code"], json!(ERROR_TIMEOUT));
        assert_eq!(wire["message"], json!("Server timed out"));
    }

    #[test]
    fn test_error_code_values() {
        assert_eq!(RpcError::fatal().code, Some(-32000));
        assert_eq!(RpcError::timeout().code, Some(-32001));
        assert_eq!(RpcError::invalid_request().code, Some(-32600));
        assert_eq!(RpcError::unknown_method("x").code, Some(-32601));
    }

    // ========== RpcResponse Tests ==========

    #[test]
    fn test_response_ok_keeps_null_error_on_wire() {
        let resp = RpcResponse::ok(json!({"pong": true}), json!("1"), 12);
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["result"], json!({"pong": true}));
        assert_eq!(wire["error"], Value::Null);
        assert_eq!(wire["id"], json!("1"));
        assert_eq!(wire["elapsed"], json!(12));
    }

    #[test]
    fn test_response_error_nulls_result() {
        let resp = RpcResponse::error(RpcError::fatal(), json!("9"), 3);
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["result"], Value::Null);
        assert_eq!(wire["error"]["code"], json!(ERROR_FATAL));
    }

    #[test]
    fn test_response_round_trip() {
        let resp = RpcResponse::error(RpcError::message("warn"), Value::Null, 0);
        let parsed: RpcResponse = serde_json::from_slice(&resp.to_body()).unwrap();
        assert_eq!(parsed, resp);
    }
}
