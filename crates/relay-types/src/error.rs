//! Error hierarchy for Relay.

use thiserror::Error;

/// Top-level error type for a chat turn.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Errors from the chat-completions API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    #[error("Server error: {status} {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Request timeout")]
    Timeout,
}

/// Errors from routing or executing a tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid input for tool '{tool}': {message}")]
    InvalidInput { tool: String, message: String },

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
}

/// Errors from loading configuration. Always fatal before any server starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("MCP server '{name}' is declared more than once")]
    DuplicateServer { name: String },
}
