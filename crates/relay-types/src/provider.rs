//! Provider trait for chat-completion model backends.

use crate::{ApiError, ChatRequest, ChatResponse};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Provider::complete`].
pub type CompletionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChatResponse, ApiError>> + Send + 'a>>;

/// Trait for model backends (OpenAI, OpenRouter, Ollama, ...).
///
/// Dyn-compatible so the agent works with `Arc<dyn Provider>`.
pub trait Provider: Send + Sync {
    /// Send one chat-completion request and wait for the full reply.
    fn complete<'a>(&'a self, request: &'a ChatRequest) -> CompletionFuture<'a>;

    /// Provider name for logging/display (e.g., "openai").
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn provider_is_dyn_compatible() {
        fn _accept(_p: &dyn Provider) {}
    }

    #[test]
    fn arc_provider_is_send_sync() {
        fn _assert_send_sync<T: Send + Sync>() {}
        _assert_send_sync::<Arc<dyn Provider>>();
    }
}
