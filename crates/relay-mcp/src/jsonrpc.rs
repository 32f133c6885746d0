//! JSON-RPC 2.0 framing for MCP stdio traffic.

use crate::error::McpError;
use serde::{Deserialize, Serialize};

/// JSON-RPC error code for an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// An outgoing request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// An outgoing notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// A reply to a request the server sent us.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcReply {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcReply {
    pub fn result(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn method_not_found(id: serde_json::Value, method: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
                data: None,
            }),
        }
    }
}

/// A response to one of our requests.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Collapse the response into its result, mapping a JSON-RPC error object.
    ///
    /// A response with neither field yields `null`.
    pub fn into_result(self, server: &str) -> Result<serde_json::Value, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::JsonRpc {
                server: server.to_string(),
                code: err.code,
                message: err.message,
            });
        }
        Ok(self.result.unwrap_or(serde_json::Value::Null))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Any line a server may write to stdout.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Reply to one of our requests.
    Response(JsonRpcResponse),
    /// Server-initiated request that needs an answer (e.g., `ping`).
    Request {
        id: serde_json::Value,
        method: String,
    },
    /// Server-initiated notification (logging, list_changed, ...).
    Notification { method: String },
}

impl Incoming {
    /// Classify one raw line.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let method = value
            .get("method")
            .and_then(|m| m.as_str())
            .map(str::to_string);

        match (method, value.get("id").cloned()) {
            (Some(method), Some(id)) if !id.is_null() => Ok(Incoming::Request { id, method }),
            (Some(method), _) => Ok(Incoming::Notification { method }),
            (None, _) => serde_json::from_value(value).map(Incoming::Response),
        }
    }
}
