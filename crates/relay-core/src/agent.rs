//! The agent loop: send the conversation, run requested tools, repeat.

use crate::names::ToolNameMap;
use crate::schema::SchemaDialect;
use relay_types::provider::Provider;
use relay_types::{
    ApiError, ChatRequest, Message, RelayError, Role, ToolCall, ToolDefinition, ToolError,
    ToolRouter, Usage, truncate_str,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Maximum number of model round-trips in one turn.
pub const MAX_TOOL_ROUNDS: usize = 25;

/// Events emitted by the agent during a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Assistant text from one model reply.
    Text(String),
    /// A tool is about to be executed.
    ToolStart { name: String, input: String },
    /// A tool has finished executing.
    ToolEnd {
        name: String,
        output: String,
        is_error: bool,
    },
    /// Accumulated usage for the turn.
    Usage(Usage),
    /// The model answered without requesting more tools.
    Done,
    /// The turn was cancelled (e.g. Ctrl+C).
    Cancelled,
    /// An error occurred.
    Error(String),
}

/// Drives one model against whatever tools a [`ToolRouter`] exposes.
pub struct Agent {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    dialect: SchemaDialect,
}

impl Agent {
    /// The schema dialect is inferred from the model id.
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            dialect: SchemaDialect::for_model(&model),
            provider,
            model,
            max_tokens: None,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_schema_dialect(mut self, dialect: SchemaDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one user turn. `messages` must already end with the user message.
    ///
    /// Assistant replies and tool results are appended to `messages`. Tool
    /// failures are reported to the model as error results and do not end
    /// the turn. On cancellation the partial round is removed from
    /// `messages` so the history stays well-formed.
    pub async fn run<F>(
        &self,
        messages: &mut Vec<Message>,
        router: &dyn ToolRouter,
        cancel: CancellationToken,
        mut on_event: F,
    ) -> Result<Usage, RelayError>
    where
        F: FnMut(AgentEvent),
    {
        let (names, definitions) = self.tool_definitions(router);
        let tools = if definitions.is_empty() {
            None
        } else {
            Some(definitions)
        };
        let mut total_usage = Usage::default();

        for round in 0..MAX_TOOL_ROUNDS {
            tracing::debug!("Agent round {} with {} messages", round + 1, messages.len());

            let mut request = ChatRequest {
                model: self.model.clone(),
                messages: std::mem::take(messages),
                tools: tools.clone(),
                max_tokens: self.max_tokens,
                temperature: None,
            };
            if let Some(prompt) = &self.system_prompt {
                request.messages.insert(0, Message::system(prompt.clone()));
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.provider.complete(&request) => Some(result),
            };

            // Restore the history before anything can return
            *messages = std::mem::take(&mut request.messages);
            if self.system_prompt.is_some() && !messages.is_empty() {
                messages.remove(0);
            }

            let response = match outcome {
                None => {
                    on_event(AgentEvent::Cancelled);
                    return Err(RelayError::Cancelled);
                }
                Some(Err(e)) => {
                    on_event(AgentEvent::Error(e.to_string()));
                    return Err(RelayError::Api(e));
                }
                Some(Ok(response)) => response,
            };

            if let Some(usage) = &response.usage {
                total_usage.add(usage);
            }

            let Some(choice) = response.choices.into_iter().next() else {
                let err = ApiError::Decode("response contained no choices".into());
                on_event(AgentEvent::Error(err.to_string()));
                return Err(RelayError::Api(err));
            };

            let mut reply = choice.message;
            reply.role = Role::Assistant;
            if !reply.text().is_empty() {
                on_event(AgentEvent::Text(reply.text().to_string()));
            }

            let calls = reply.tool_calls.clone();
            let history_len = messages.len();
            messages.push(reply);

            if calls.is_empty() {
                on_event(AgentEvent::Done);
                on_event(AgentEvent::Usage(total_usage.clone()));
                return Ok(total_usage);
            }

            for call in &calls {
                let display_name = names
                    .resolve(&call.function.name)
                    .unwrap_or(&call.function.name)
                    .to_string();
                on_event(AgentEvent::ToolStart {
                    name: display_name.clone(),
                    input: truncate_for_display(&call.function.arguments, 200),
                });

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        on_event(AgentEvent::Cancelled);
                        messages.truncate(history_len);
                        return Err(RelayError::Cancelled);
                    }
                    result = dispatch(&names, router, call) => result,
                };

                let (text, is_error) = match result {
                    Ok(output) => (output.to_text(), output.is_error),
                    Err(e) => (e.to_string(), true),
                };
                if is_error {
                    tracing::debug!("Tool '{display_name}' failed: {text}");
                }

                on_event(AgentEvent::ToolEnd {
                    name: display_name,
                    output: truncate_for_display(&text, 200),
                    is_error,
                });

                let content = if is_error {
                    format!("Error: {text}")
                } else {
                    text
                };
                messages.push(Message::tool_result(call.id.clone(), content));
            }
        }

        on_event(AgentEvent::Error(format!(
            "Maximum tool rounds ({MAX_TOOL_ROUNDS}) reached"
        )));
        Ok(total_usage)
    }

    /// Wire-safe definitions for every routed tool, shaped for the model.
    fn tool_definitions(&self, router: &dyn ToolRouter) -> (ToolNameMap, Vec<ToolDefinition>) {
        let specs = router.tools();
        let names = ToolNameMap::new(specs.iter().map(|s| s.name.as_str()));
        let definitions = specs
            .iter()
            .filter_map(|spec| {
                let wire = names.wire_name(&spec.name)?;
                Some(ToolDefinition::function(
                    wire,
                    spec.description.clone(),
                    self.dialect.apply(&spec.input_schema),
                ))
            })
            .collect();
        (names, definitions)
    }
}

async fn dispatch(
    names: &ToolNameMap,
    router: &dyn ToolRouter,
    call: &ToolCall,
) -> Result<relay_types::ToolOutput, ToolError> {
    let Some(name) = names.resolve(&call.function.name) else {
        return Err(ToolError::UnknownTool {
            name: call.function.name.clone(),
        });
    };

    let raw = call.function.arguments.trim();
    let input = if raw.is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(raw).map_err(|e| ToolError::InvalidInput {
            tool: name.to_string(),
            message: format!("arguments are not valid JSON: {e}"),
        })?
    };

    router.route(name, input).await
}

/// Truncate a string for display purposes.
fn truncate_for_display(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", truncate_str(s, max_len))
    }
}
