//! Provider dispatch: one backend per model block, chosen at load time.

use super::ChatModel;
use super::client::OpenAiClient;
use super::ollama::OllamaClient;
use crate::config::{ModelBlock, Provider};
use crate::error::Result;
use async_trait::async_trait;

/// A ready-to-call backend resolved from a [`ModelBlock`].
#[derive(Clone)]
pub enum Backend {
    /// Hosted OpenAI or a vLLM server (same wire protocol).
    OpenAi(OpenAiClient),
    Ollama(OllamaClient),
}

impl Backend {
    /// Resolve the block's provider tag and build the matching client.
    ///
    /// Unknown providers fail here, before any network call.
    pub fn from_block(block: &ModelBlock) -> Result<Self> {
        let backend = match block.provider()? {
            Provider::OpenAi => Backend::OpenAi(OpenAiClient::hosted(block)?),
            Provider::Vllm => Backend::OpenAi(OpenAiClient::self_hosted(block)?),
            Provider::Ollama => Backend::Ollama(OllamaClient::new(block)?),
        };

        tracing::debug!(provider = %block.provider, model = %block.model, "resolved backend");
        Ok(backend)
    }
}

#[async_trait]
impl ChatModel for Backend {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        match self {
            Backend::OpenAi(client) => client.generate(system, user).await,
            Backend::Ollama(client) => client.generate(system, user).await,
        }
    }
}

/// One-shot helper: resolve `block` and generate a single reply.
pub async fn call_chat(block: &ModelBlock, system: &str, user: &str) -> Result<String> {
    Backend::from_block(block)?.generate(system, user).await
}
