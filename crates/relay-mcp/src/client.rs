//! MCP client for one stdio server connection.
//!
//! Handles the protocol handshake (initialize + initialized notification),
//! tool discovery (tools/list, following pagination cursors), and tool
//! invocation (tools/call).

use crate::config::ServerSpec;
use crate::error::McpError;
use crate::handle::{Connection, Launcher};
use crate::transport::StdioTransport;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::time::Duration;

/// MCP protocol version we speak.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// How long a server gets to exit after stdin closes before it is killed.
const GRACEFUL_EXIT: Duration = Duration::from_secs(3);

/// Guard against servers that hand out cursors forever.
const MAX_TOOL_PAGES: usize = 64;

/// A tool as advertised by an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of calling a tool, as the server returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct McpToolResult {
    pub content: Vec<McpToolContent>,
    pub is_error: bool,
    pub structured_content: Option<serde_json::Value>,
}

/// A content item in a tool result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum McpToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: serde_json::Value,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize)]
struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    protocol_version: Option<String>,
    #[serde(default, rename = "serverInfo")]
    server_info: Option<ServerInfo>,
}

#[derive(Deserialize)]
struct ServerInfo {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolEntry>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Deserialize)]
struct ToolCallResult {
    #[serde(default)]
    content: Vec<McpToolContent>,
    #[serde(default, rename = "isError")]
    is_error: bool,
    #[serde(default, rename = "structuredContent")]
    structured_content: Option<serde_json::Value>,
}

/// Client for a single stdio MCP server.
pub struct McpClient {
    name: String,
    transport: StdioTransport,
}

impl McpClient {
    /// Spawn the server described by `spec` and complete the handshake.
    ///
    /// On failure the half-started child is dropped, which kills it.
    pub async fn connect(spec: &ServerSpec) -> Result<Self, McpError> {
        let transport = StdioTransport::spawn(spec)?;

        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "relay",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = transport
            .send_request("initialize", Some(init_params))
            .await?
            .into_result(&spec.name)?;

        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse initialize result: {e}")))?;
        match init.server_info {
            Some(info) => tracing::debug!(
                "MCP server '{}' is {} {} (protocol {})",
                spec.name,
                info.name,
                info.version.as_deref().unwrap_or("?"),
                init.protocol_version.as_deref().unwrap_or("?")
            ),
            None => tracing::debug!("MCP server '{}' sent no serverInfo", spec.name),
        }

        transport
            .send_notification("notifications/initialized", None)
            .await?;

        Ok(Self {
            name: spec.name.clone(),
            transport,
        })
    }

    /// Fetch the full tool list, following `nextCursor` pages.
    pub async fn fetch_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.take().map(|c| serde_json::json!({ "cursor": c }));
            let result = self
                .transport
                .send_request("tools/list", params)
                .await?
                .into_result(&self.name)?;

            let page: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?;

            tools.extend(page.tools.into_iter().map(|t| McpToolInfo {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(
            "MCP server '{}' kept paginating tools/list; keeping the first {} tools",
            self.name,
            tools.len()
        );
        Ok(tools)
    }

    /// Call a tool on this server.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, McpError> {
        tracing::info!("MCP server '{}': calling tool {tool_name}", self.name);
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let resp = self
            .transport
            .send_request("tools/call", Some(params))
            .await?;

        if resp.error.is_none() && resp.result.is_none() {
            return Err(McpError::Protocol(
                "tools/call response has neither result nor error".to_string(),
            ));
        }
        let result = resp.into_result(&self.name)?;

        let call_result: ToolCallResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))?;

        Ok(McpToolResult {
            content: call_result.content,
            is_error: call_result.is_error,
            structured_content: call_result.structured_content,
        })
    }

    /// Shut down the server connection.
    pub async fn shutdown(self) -> Result<(), McpError> {
        self.transport.shutdown(GRACEFUL_EXIT).await
    }
}

impl Connection for McpClient {
    fn tools(&self) -> BoxFuture<'_, Result<Vec<McpToolInfo>, McpError>> {
        Box::pin(self.fetch_tools())
    }

    fn invoke<'a>(
        &'a self,
        tool_name: &'a str,
        arguments: serde_json::Value,
    ) -> BoxFuture<'a, Result<McpToolResult, McpError>> {
        Box::pin(self.call_tool(tool_name, arguments))
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), McpError>> {
        Box::pin((*self).shutdown())
    }
}

/// Launches servers as child processes speaking MCP over stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioLauncher;

impl Launcher for StdioLauncher {
    fn launch<'a>(
        &'a self,
        spec: &'a ServerSpec,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, McpError>> {
        Box::pin(async move {
            let client = McpClient::connect(spec).await?;
            Ok(Box::new(client) as Box<dyn Connection>)
        })
    }
}
