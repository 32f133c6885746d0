//! Tool provider handle: one MCP server's connection and lifecycle state.

use crate::client::{McpToolInfo, McpToolResult};
use crate::config::ServerSpec;
use crate::error::{McpError, ProviderStartError};
use futures_util::future::BoxFuture;
use std::fmt;
use std::time::Duration;

/// Lifecycle of a provider connection.
///
/// `NotStarted → Starting → Ready | Failed`, and any live state `→ Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderState {
    NotStarted,
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProviderState::NotStarted => "not started",
            ProviderState::Starting => "starting",
            ProviderState::Ready => "ready",
            ProviderState::Failed => "failed",
            ProviderState::Stopped => "stopped",
        };
        f.pad(label)
    }
}

/// An established, handshaken connection to a tool provider.
pub trait Connection: Send + Sync {
    /// Ask the provider for its advertised tools.
    fn tools(&self) -> BoxFuture<'_, Result<Vec<McpToolInfo>, McpError>>;

    /// Forward one tool call.
    fn invoke<'a>(
        &'a self,
        tool_name: &'a str,
        arguments: serde_json::Value,
    ) -> BoxFuture<'a, Result<McpToolResult, McpError>>;

    /// Release the connection and whatever process backs it.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<(), McpError>>;
}

/// Opens connections from launch specs.
pub trait Launcher: Send + Sync {
    /// Start the provider described by `spec` and complete its handshake.
    fn launch<'a>(
        &'a self,
        spec: &'a ServerSpec,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, McpError>>;
}

/// In-process representative of one tool provider.
///
/// Exclusively owns its spec and connection. Only the session mutates it.
pub struct ToolProviderHandle {
    spec: ServerSpec,
    state: ProviderState,
    connection: Option<Box<dyn Connection>>,
    tools: Option<Vec<McpToolInfo>>,
    last_error: Option<String>,
}

impl ToolProviderHandle {
    pub fn new(spec: ServerSpec) -> Self {
        Self {
            spec,
            state: ProviderState::NotStarted,
            connection: None,
            tools: None,
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn state(&self) -> ProviderState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ProviderState::Ready
    }

    /// Message of the error that failed this handle, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Launch, handshake, and prime the tool cache, all within `timeout`.
    pub async fn start(
        &mut self,
        launcher: &dyn Launcher,
        timeout: Duration,
    ) -> Result<(), ProviderStartError> {
        if self.state != ProviderState::NotStarted {
            return Err(ProviderStartError {
                name: self.spec.name.clone(),
                source: McpError::InvalidState {
                    name: self.spec.name.clone(),
                    state: self.state,
                },
            });
        }

        self.state = ProviderState::Starting;
        tracing::debug!(
            "Starting MCP server '{}': {} {}",
            self.spec.name,
            self.spec.command,
            self.spec.args.join(" ")
        );

        let outcome = tokio::time::timeout(timeout, connect(launcher, &self.spec)).await;
        let source = match outcome {
            Ok(Ok((connection, tools))) => {
                tracing::info!(
                    "MCP server '{}' ready with {} tools",
                    self.spec.name,
                    tools.len()
                );
                self.connection = Some(connection);
                self.tools = Some(tools);
                self.state = ProviderState::Ready;
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => McpError::Timeout {
                name: self.spec.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            },
        };

        self.state = ProviderState::Failed;
        self.last_error = Some(source.to_string());
        Err(ProviderStartError {
            name: self.spec.name.clone(),
            source,
        })
    }

    /// The provider's tools. Fetched at most once per handle, then cached.
    pub async fn list_tools(&mut self) -> Result<&[McpToolInfo], McpError> {
        self.ensure_ready()?;
        if self.tools.is_none() {
            let connection = self.connection.as_ref().ok_or_else(|| self.not_ready())?;
            let fetched = connection.tools().await?;
            self.tools = Some(fetched);
        }
        Ok(self.tools.as_deref().unwrap_or_default())
    }

    /// Cached tools of a ready handle; empty for any other state.
    pub fn cached_tools(&self) -> &[McpToolInfo] {
        if self.is_ready() {
            self.tools.as_deref().unwrap_or_default()
        } else {
            &[]
        }
    }

    /// Forward a call to the provider and return its result verbatim. No retries.
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, McpError> {
        self.ensure_ready()?;
        let connection = self.connection.as_ref().ok_or_else(|| self.not_ready())?;
        connection.invoke(tool_name, arguments).await
    }

    /// Release the connection. Idempotent; a no-op on stopped or failed handles.
    ///
    /// The handle is marked Stopped before the release is attempted, so a
    /// release that errors or exceeds `timeout` still leaves it Stopped.
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), McpError> {
        match self.state {
            ProviderState::Stopped | ProviderState::Failed => return Ok(()),
            ProviderState::NotStarted | ProviderState::Starting | ProviderState::Ready => {}
        }

        self.state = ProviderState::Stopped;
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, connection.close()).await {
            Ok(result) => {
                tracing::debug!("MCP server '{}' stopped", self.spec.name);
                result
            }
            Err(_) => Err(McpError::Timeout {
                name: self.spec.name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(self.not_ready())
        }
    }

    fn not_ready(&self) -> McpError {
        McpError::NotReady {
            name: self.spec.name.clone(),
            state: self.state,
        }
    }
}

impl fmt::Debug for ToolProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolProviderHandle")
            .field("name", &self.spec.name)
            .field("state", &self.state)
            .field("tools", &self.tools.as_ref().map(Vec::len))
            .finish()
    }
}

async fn connect(
    launcher: &dyn Launcher,
    spec: &ServerSpec,
) -> Result<(Box<dyn Connection>, Vec<McpToolInfo>), McpError> {
    let connection = launcher.launch(spec).await?;
    match connection.tools().await {
        Ok(tools) => Ok((connection, tools)),
        Err(e) => {
            if let Err(close_err) = connection.close().await {
                tracing::debug!("Closing '{}' after failed tools/list: {close_err}", spec.name);
            }
            Err(e)
        }
    }
}
