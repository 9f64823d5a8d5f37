//! JSON-RPC request and response message types.
//!
//! The bridge never interprets Ethereum method semantics: requests flow to
//! the active backend as-is, responses (including protocol-level errors)
//! flow back to the page verbatim. These types exist for id correlation and
//! logging, not validation.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// RpcId
// ============================================================================

/// JSON-RPC request identifier.
///
/// Pages send numbers or strings; both are accepted and preserved exactly.
/// The id is unique per session while the request is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    /// Numeric id (the common case).
    Num(u64),
    /// String id.
    Str(String),
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RpcId {
    fn from(n: u64) -> Self {
        Self::Num(n)
    }
}

impl From<&str> for RpcId {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

// ============================================================================
// RpcRequest
// ============================================================================

/// A JSON-RPC request accepted from the page.
///
/// # Format
///
/// ```json
/// {
///   "id": 1,
///   "jsonrpc": "2.0",
///   "method": "eth_chainId",
///   "params": []
/// }
/// ```
///
/// The `jsonrpc` field is passed through when the page supplies it and
/// filled in for backends that expect strict 2.0 framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Request id, unique per session while in flight.
    pub id: RpcId,

    /// JSON-RPC version marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,

    /// Method name, e.g. `eth_sendTransaction`.
    pub method: String,

    /// Method parameters, passed through untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Creates a request with 2.0 framing.
    #[must_use]
    pub fn new(id: impl Into<RpcId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            jsonrpc: Some("2.0".to_string()),
            method: method.into(),
            params,
        }
    }

    /// Serializes the request to its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if serialization fails (practically
    /// impossible for these types).
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// RpcResponse
// ============================================================================

/// A JSON-RPC response emitted by a backend.
///
/// Exactly one of `result` / `error` is expected, but the bridge does not
/// enforce that: whatever the backend sent is forwarded to the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Matches the request `id`.
    pub id: RpcId,

    /// JSON-RPC version marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,

    /// Result value (if success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error object (if error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the response id from a raw inbound frame, if present.
    ///
    /// Used to clear pending-request bookkeeping without requiring the full
    /// frame to deserialize as a response.
    #[must_use]
    pub fn id_of(frame: &Value) -> Option<RpcId> {
        match frame.get("id") {
            Some(Value::Number(n)) => n.as_u64().map(RpcId::Num),
            Some(Value::String(s)) => Some(RpcId::Str(s.clone())),
            _ => None,
        }
    }
}

// ============================================================================
// RpcError
// ============================================================================

/// JSON-RPC error object, passed through to the page verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code (e.g. -32601 method not found).
    pub code: i64,

    /// Human-readable message.
    pub message: String,

    /// Optional additional data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = RpcRequest::new(1u64, "eth_chainId", None);
        let json = request.to_wire().expect("serialize");

        assert!(json.contains("\"method\":\"eth_chainId\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_request_from_page_without_version() {
        // Pages often send bare {id, method, params}.
        let json = r#"{"id": 7, "method": "eth_accounts", "params": []}"#;
        let request: RpcRequest = serde_json::from_str(json).expect("parse");

        assert_eq!(request.id, RpcId::Num(7));
        assert_eq!(request.method, "eth_accounts");
        assert!(request.jsonrpc.is_none());
    }

    #[test]
    fn test_string_id_preserved() {
        let json = r#"{"id": "req-abc", "method": "eth_call"}"#;
        let request: RpcRequest = serde_json::from_str(json).expect("parse");
        assert_eq!(request.id, RpcId::Str("req-abc".to_string()));

        let wire = request.to_wire().expect("serialize");
        assert!(wire.contains("\"id\":\"req-abc\""));
    }

    #[test]
    fn test_success_response() {
        let json = r#"{"id": 1, "jsonrpc": "2.0", "result": "0x1"}"#;
        let response: RpcResponse = serde_json::from_str(json).expect("parse");

        assert!(!response.is_error());
        assert_eq!(response.result, Some(Value::String("0x1".to_string())));
    }

    #[test]
    fn test_error_response_passthrough() {
        let json = r#"{
            "id": 2,
            "jsonrpc": "2.0",
            "error": {"code": -32601, "message": "method not found"}
        }"#;
        let response: RpcResponse = serde_json::from_str(json).expect("parse");

        assert!(response.is_error());
        let error = response.error.expect("error object");
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "method not found");
    }

    #[test]
    fn test_id_of_raw_frame() {
        let num = serde_json::json!({"id": 3, "result": "0x0"});
        assert_eq!(RpcResponse::id_of(&num), Some(RpcId::Num(3)));

        let string = serde_json::json!({"id": "x", "result": null});
        assert_eq!(RpcResponse::id_of(&string), Some(RpcId::Str("x".to_string())));

        let missing = serde_json::json!({"method": "eth_subscription"});
        assert_eq!(RpcResponse::id_of(&missing), None);
    }

    #[test]
    fn test_rpc_id_display() {
        assert_eq!(RpcId::Num(42).to_string(), "42");
        assert_eq!(RpcId::from("abc").to_string(), "abc");
    }
}
