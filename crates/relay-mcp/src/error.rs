//! Error types for MCP operations.

use crate::handle::ProviderState;
use crate::session::SessionState;
use thiserror::Error;

/// Errors from communicating with a single MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("MCP server '{name}' is not ready (state: {state})")]
    NotReady { name: String, state: ProviderState },

    #[error("MCP server '{name}' cannot be started from state {state}")]
    InvalidState { name: String, state: ProviderState },

    #[error("MCP server '{name}' closed the connection")]
    ConnectionClosed { name: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("MCP server '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A provider failed to come up. Non-fatal: the session continues without it.
#[derive(Debug, Error)]
#[error("MCP server '{name}' failed to start: {source}")]
pub struct ProviderStartError {
    pub name: String,
    #[source]
    pub source: McpError,
}

/// Errors surfaced by the session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown tool: '{name}'")]
    UnknownTool { name: String },

    #[error("Tool '{tool}' on MCP server '{server}' failed: {source}")]
    ToolInvocation {
        tool: String,
        server: String,
        #[source]
        source: McpError,
    },

    #[error("Session startup was interrupted")]
    Interrupted,

    #[error("Session is {actual}, expected {expected}")]
    InvalidState {
        actual: SessionState,
        expected: SessionState,
    },
}
