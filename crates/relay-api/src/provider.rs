//! OpenAI-compatible provider implementation.

use crate::client::ChatClient;
use crate::retry::RetryConfig;
use relay_types::provider::{CompletionFuture, Provider};
use relay_types::{ApiError, ChatRequest};

/// Provider for any endpoint speaking the OpenAI chat-completions API
/// (OpenAI, OpenRouter, Ollama, vLLM, ...).
///
/// Retry logic stays in `ChatClient`.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: ChatClient,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self {
            client: ChatClient::new(api_key, base_url)?,
        })
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.client = self.client.with_retry_config(config);
        self
    }
}

impl Provider for OpenAiProvider {
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a> {
        Box::pin(self.client.complete(request))
    }

    fn name(&self) -> &str {
        "openai"
    }
}
