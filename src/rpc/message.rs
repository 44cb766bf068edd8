//! JSON-RPC 2.0 message shapes (spec.md §4.5 C5).
//!
//! Grounded on the teacher's `mcp::client::McpClient::send_request`, which
//! builds request objects ad hoc with `json!`; here they are proper typed
//! structs so the transport can distinguish a `Response` from a
//! `Notification` on the way in without re-parsing by hand.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

// ─── Standard JSON-RPC error codes ─────────────────────────────────────────
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// ─── Application-specific error codes (spec.md §4.5) ───────────────────────
pub const APP_ERROR: i64 = -32000;
pub const NOT_READY_ERROR: i64 = -32001;
pub const TIMEOUT_ERROR: i64 = -32002;
/// Connection dropped mid-call; the default classifier treats this code
/// (and only this code) as caller-retryable.
pub const CONNECTION_ERROR: i64 = -32003;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// `true` only for [`CONNECTION_ERROR`] — spec.md §4.5's sole
    /// classified-retryable JSON-RPC code.
    pub fn is_retryable(&self) -> bool {
        self.code == CONNECTION_ERROR
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// A raw line off the wire, before we know whether it carries an `id`
/// (making it a [`Response`]) or not (making it a [`Notification`] sent
/// *to* us — e.g. a sidecar's `stream.chunk` push).
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Response(Response),
    Notification(Notification),
}

impl IncomingMessage {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        if value.get("id").is_some() && (value.get("result").is_some() || value.get("error").is_some()) {
            Ok(IncomingMessage::Response(serde_json::from_value(value)?))
        } else {
            Ok(IncomingMessage::Notification(serde_json::from_value(value)?))
        }
    }
}
