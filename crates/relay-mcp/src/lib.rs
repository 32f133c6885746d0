//! MCP (Model Context Protocol) tool-server sessions for Relay.
//!
//! A session reads a list of server launch specs, spawns each server as a
//! child process speaking newline-delimited JSON-RPC 2.0 over stdio, merges
//! the tools they advertise into one registry, and routes the agent's tool
//! calls back to the owning server until the session is closed.

pub mod client;
pub mod config;
pub mod error;
pub mod handle;
pub mod jsonrpc;
pub mod registry;
pub mod session;
mod transport;

pub use client::{McpClient, McpToolContent, McpToolInfo, McpToolResult, StdioLauncher};
pub use config::{ConfigFormat, ServerSpec};
pub use error::{McpError, ProviderStartError, SessionError};
pub use handle::{Connection, Launcher, ProviderState, ToolProviderHandle};
pub use registry::{HandleId, ToolDescriptor, ToolRegistry};
pub use session::{McpSession, ServerStatus, SessionOptions, SessionState, ShutdownReport};
