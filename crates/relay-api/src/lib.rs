//! OpenAI-compatible chat-completions client for Relay.

mod client;
mod provider;
mod retry;

pub use client::ChatClient;
pub use provider::OpenAiProvider;
pub use retry::RetryConfig;
