//! Tool routing seam between the agent and whatever owns the tools.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

use crate::error::ToolError;

/// A callable tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Registry name; unique within one router.
    pub name: String,
    pub description: String,
    /// Provider-defined JSON schema, passed through untouched.
    pub input_schema: serde_json::Value,
}

/// Result of executing a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ToolOutputContent>,
    /// The tool ran but reported failure.
    pub is_error: bool,
}

/// A single piece of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolOutputContent {
    Text { text: String },
    Image { mime_type: String, data: String },
    Audio { mime_type: String, data: String },
    Resource { resource: serde_json::Value },
}

impl ToolOutput {
    /// Create a successful text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutputContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Flatten the output into plain text for a text-only model channel.
    ///
    /// Binary items are replaced with a short placeholder.
    pub fn to_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolOutputContent::Text { text } => text.clone(),
                ToolOutputContent::Image { mime_type, data } => {
                    format!("[image: {mime_type}, {} bytes base64]", data.len())
                }
                ToolOutputContent::Audio { mime_type, data } => {
                    format!("[audio: {mime_type}, {} bytes base64]", data.len())
                }
                ToolOutputContent::Resource { resource } => resource
                    .get("text")
                    .and_then(|t| t.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| resource.to_string()),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Boxed future returned by [`ToolRouter::route`].
pub type RouteFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

/// Routes tool calls issued by the agent to their owner.
///
/// The MCP session implements this; tests substitute in-memory routers.
pub trait ToolRouter: Send + Sync {
    /// All tools currently callable, in a stable order.
    fn tools(&self) -> Vec<ToolSpec>;

    /// Invoke the tool registered under `name`.
    fn route<'a>(&'a self, name: &'a str, input: serde_json::Value) -> RouteFuture<'a>;
}
