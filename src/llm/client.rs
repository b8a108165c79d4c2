//! OpenAI-compatible LLM client.
//!
//! Serves both the hosted OpenAI endpoint and self-hosted servers such as
//! vLLM that expose the same `/chat/completions` protocol.

use super::ChatModel;
use crate::config::{self, ModelBlock};
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hosted endpoint used when a block has no `base_url`.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Message role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request body for chat completion.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

/// Response from chat completion.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Legacy completions request used to score prompt tokens.
#[derive(Debug, Serialize)]
struct EchoCompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    echo: bool,
    logprobs: u32,
}

#[derive(Debug, Deserialize)]
struct EchoCompletionResponse {
    choices: Vec<EchoChoice>,
}

#[derive(Debug, Deserialize)]
struct EchoChoice {
    logprobs: Option<EchoLogprobs>,
}

#[derive(Debug, Deserialize)]
struct EchoLogprobs {
    token_logprobs: Vec<Option<f64>>,
}

/// OpenAI API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// OpenAI-compatible chat client bound to one model block.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    /// Client for the hosted endpoint (`OPENAI_BASE_URL` env overrides it).
    pub fn hosted(block: &ModelBlock) -> Result<Self> {
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| OPENAI_BASE_URL.to_string());
        Self::with_base_url(block, base_url, config::api_key_for(block))
    }

    /// Client for a self-hosted server at the block's `base_url`.
    pub fn self_hosted(block: &ModelBlock) -> Result<Self> {
        let base_url = block.base_url.clone().ok_or_else(|| {
            EvalError::Config(format!(
                "Block for model '{}' needs a base_url for provider '{}'",
                block.model, block.provider
            ))
        })?;
        let api_key = config::api_key_for(block).or_else(|| Some("EMPTY".to_string()));
        Self::with_base_url(block, base_url, api_key)
    }

    fn with_base_url(block: &ModelBlock, base_url: String, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EvalError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: block.model.clone(),
            temperature: block.temperature(),
            max_tokens: block.max_tokens(),
        })
    }

    /// Get the chat endpoint URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }

    fn completions_endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        format!("{}/completions", base)
    }

    /// POST a JSON body and return the raw success body.
    async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<String> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Try to parse as API error
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&body) {
                return Err(EvalError::HttpStatus {
                    status: status.as_u16(),
                    body: api_error.error.message,
                });
            }
            return Err(EvalError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }

    /// Send a chat completion request and return the first choice's text.
    pub async fn chat(&self, messages: Vec<Message>) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let body = self.post_json(&self.endpoint(), &request).await?;
        let completion: ChatCompletionResponse = serde_json::from_str(&body)?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| EvalError::LlmApi("No choices in response".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }

    /// Per-token log-probabilities of `text` itself, via `echo` + `logprobs`.
    ///
    /// The first token has no conditional probability and is reported as `None`.
    pub async fn prompt_logprobs(&self, text: &str) -> Result<Vec<Option<f64>>> {
        let request = EchoCompletionRequest {
            model: &self.model,
            prompt: text,
            max_tokens: 0,
            temperature: 0.0,
            echo: true,
            logprobs: 0,
        };

        let body = self.post_json(&self.completions_endpoint(), &request).await?;
        let completion: EchoCompletionResponse = serde_json::from_str(&body)?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.logprobs)
            .map(|lp| lp.token_logprobs)
            .ok_or_else(|| EvalError::LlmApi("No logprobs in completion response".to_string()))
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        self.chat(vec![Message::system(system), Message::user(user)])
            .await
    }
}
