//! LLM integration module.
//!
//! Provides the backend clients (OpenAI-compatible and Ollama), the
//! dispatcher that picks one from a [`ModelBlock`](crate::config::ModelBlock),
//! the retry policy for fragile transports and the fixed prompts.

mod client;
mod dispatch;
mod ollama;
mod prompts;
mod retry;

use crate::error::Result;
use async_trait::async_trait;

pub use client::{Message, OpenAiClient, Role};
pub use dispatch::{Backend, call_chat};
pub use ollama::OllamaClient;
pub use prompts::{Prompts, fill};
pub use retry::RetryPolicy;

/// Uniform text-generation contract shared by every backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a reply to a (system, user) prompt pair.
    async fn generate(&self, system: &str, user: &str) -> Result<String>;
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for std::sync::Arc<T> {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        (**self).generate(system, user).await
    }
}
