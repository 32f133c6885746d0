//! Session manager: owns every provider handle for one interactive run.
//!
//! `open` starts the handles and builds the registry, `route_tool_call`
//! dispatches into it, and `close` releases everything. Every handle that
//! was started is stopped by `close`, including after an interrupted `open`.

use crate::client::{McpToolContent, McpToolResult};
use crate::config::ServerSpec;
use crate::error::SessionError;
use crate::handle::{Launcher, ProviderState, ToolProviderHandle};
use crate::registry::ToolRegistry;
use futures_util::future::join_all;
use relay_types::{RouteFuture, ToolError, ToolOutput, ToolOutputContent, ToolRouter, ToolSpec};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// `Initializing → Active → ShuttingDown → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Initializing,
    Active,
    ShuttingDown,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::ShuttingDown => "shutting down",
            SessionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Per-handle bounds for startup and shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Launch + handshake + initial tools/list, per handle.
    pub startup_timeout: Duration,
    /// Connection release, per handle.
    pub shutdown_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Outcome of [`McpSession::close`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Servers whose live connection was released.
    pub stopped: Vec<String>,
    /// `(server, error)` for every release that failed or timed out.
    pub failures: Vec<(String, String)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One row of [`McpSession::summary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub name: String,
    pub state: ProviderState,
    pub tools: usize,
    pub error: Option<String>,
}

/// The set of tool providers for one run, plus their merged registry.
pub struct McpSession {
    handles: Vec<ToolProviderHandle>,
    registry: ToolRegistry,
    state: SessionState,
    warnings: Vec<String>,
    launcher: Box<dyn Launcher>,
    options: SessionOptions,
}

impl McpSession {
    /// One handle per spec, in declaration order. Nothing is started yet.
    pub fn new(
        specs: Vec<ServerSpec>,
        launcher: impl Launcher + 'static,
        options: SessionOptions,
    ) -> Self {
        Self {
            handles: specs.into_iter().map(ToolProviderHandle::new).collect(),
            registry: ToolRegistry::default(),
            state: SessionState::Initializing,
            warnings: Vec::new(),
            launcher: Box::new(launcher),
            options,
        }
    }

    /// Start every handle concurrently and build the registry.
    ///
    /// Returns once every start attempt has resolved. Failed providers are
    /// recorded in [`warnings`](Self::warnings) and leave the session Active
    /// with a smaller registry. If `cancel` fires first, in-flight starts are
    /// abandoned and `Interrupted` is returned; `close` still has to run.
    pub async fn open(&mut self, cancel: &CancellationToken) -> Result<(), SessionError> {
        if self.state != SessionState::Initializing {
            return Err(SessionError::InvalidState {
                actual: self.state,
                expected: SessionState::Initializing,
            });
        }

        tracing::debug!("Starting {} MCP servers", self.handles.len());
        let results = {
            let launcher = self.launcher.as_ref();
            let timeout = self.options.startup_timeout;
            let starts = join_all(
                self.handles
                    .iter_mut()
                    .filter(|h| h.state() == ProviderState::NotStarted)
                    .map(|h| h.start(launcher, timeout)),
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                results = starts => Some(results),
            }
        };

        let Some(results) = results else {
            tracing::warn!("MCP session startup interrupted");
            return Err(SessionError::Interrupted);
        };

        for err in results.into_iter().filter_map(Result::err) {
            tracing::warn!("{err}");
            self.warnings.push(format!("{}: {}", err.name, err.source));
        }

        self.registry = ToolRegistry::build(&self.handles);
        self.state = SessionState::Active;
        tracing::info!(
            "MCP session active: {}/{} servers ready, {} tools",
            self.handles.iter().filter(|h| h.is_ready()).count(),
            self.handles.len(),
            self.registry.len()
        );
        Ok(())
    }

    /// Current registry snapshot.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Rebuild the registry from the handles' current states.
    pub fn refresh(&mut self) {
        self.registry = ToolRegistry::build(&self.handles);
    }

    /// Dispatch a call to the provider that owns `qualified_name`.
    pub async fn route_tool_call(
        &self,
        qualified_name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, SessionError> {
        let unknown = || SessionError::UnknownTool {
            name: qualified_name.to_string(),
        };
        let descriptor = self.registry.get(qualified_name).ok_or_else(unknown)?;
        let handle = self.handles.get(descriptor.handle.0).ok_or_else(unknown)?;

        handle
            .invoke(&descriptor.tool_name, arguments)
            .await
            .map_err(|source| SessionError::ToolInvocation {
                tool: qualified_name.to_string(),
                server: descriptor.server.clone(),
                source,
            })
    }

    /// Stop every handle and move to Closed. Never fails.
    ///
    /// Each stop is bounded by the shutdown timeout; one failing release does
    /// not prevent the others. A second call is a no-op.
    pub async fn close(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.state == SessionState::Closed {
            return report;
        }

        self.state = SessionState::ShuttingDown;
        let timeout = self.options.shutdown_timeout;
        for handle in &mut self.handles {
            let was_live = handle.is_ready();
            let result = handle.stop(timeout).await;
            if was_live {
                report.stopped.push(handle.name().to_string());
            }
            if let Err(e) = result {
                report.failures.push((handle.name().to_string(), e.to_string()));
            }
        }

        self.registry = ToolRegistry::build(&self.handles);
        self.state = SessionState::Closed;

        if report.is_clean() {
            tracing::debug!("MCP session closed, {} servers stopped", report.stopped.len());
        } else {
            let details: Vec<String> = report
                .failures
                .iter()
                .map(|(name, err)| format!("{name}: {err}"))
                .collect();
            tracing::warn!(
                "MCP session closed with {} shutdown errors: {}",
                report.failures.len(),
                details.join("; ")
            );
        }
        report
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handles(&self) -> &[ToolProviderHandle] {
        &self.handles
    }

    /// One message per provider that failed to start.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn summary(&self) -> Vec<ServerStatus> {
        self.handles
            .iter()
            .enumerate()
            .map(|(i, h)| ServerStatus {
                name: h.name().to_string(),
                state: h.state(),
                tools: self.registry.count_for(crate::registry::HandleId(i)),
                error: h.last_error().map(str::to_string),
            })
            .collect()
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        let live = self.handles.iter().filter(|h| h.is_ready()).count();
        if live > 0 {
            tracing::warn!("MCP session dropped without close; killing {live} servers");
        }
    }
}

impl fmt::Debug for McpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpSession")
            .field("state", &self.state)
            .field("handles", &self.handles)
            .field("tools", &self.registry.len())
            .finish()
    }
}

impl ToolRouter for McpSession {
    fn tools(&self) -> Vec<ToolSpec> {
        self.registry
            .iter()
            .map(|t| ToolSpec {
                name: t.qualified_name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    fn route<'a>(&'a self, name: &'a str, input: serde_json::Value) -> RouteFuture<'a> {
        Box::pin(async move {
            match self.route_tool_call(name, input).await {
                Ok(result) => Ok(to_tool_output(result)),
                Err(SessionError::UnknownTool { name }) => Err(ToolError::UnknownTool { name }),
                Err(e) => Err(ToolError::ExecutionFailed(e.to_string())),
            }
        })
    }
}

fn to_tool_output(result: McpToolResult) -> ToolOutput {
    let mut content: Vec<ToolOutputContent> = result
        .content
        .into_iter()
        .map(|item| match item {
            McpToolContent::Text { text } => ToolOutputContent::Text { text },
            McpToolContent::Image { data, mime_type } => {
                ToolOutputContent::Image { mime_type, data }
            }
            McpToolContent::Audio { data, mime_type } => {
                ToolOutputContent::Audio { mime_type, data }
            }
            McpToolContent::Resource { resource } => ToolOutputContent::Resource { resource },
            McpToolContent::Unsupported => ToolOutputContent::Text {
                text: "[unsupported content]".to_string(),
            },
        })
        .collect();

    if content.is_empty() {
        if let Some(structured) = result.structured_content {
            content.push(ToolOutputContent::Text {
                text: structured.to_string(),
            });
        }
    }

    ToolOutput {
        content,
        is_error: result.is_error,
    }
}
