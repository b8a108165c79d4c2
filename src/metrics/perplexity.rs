//! Perplexity from prompt log-probabilities.
//!
//! A completions endpoint that supports `echo` and `logprobs` (vLLM serving
//! `gpt2`, for instance) scores the candidate text token by token; perplexity
//! is `exp(-mean logprob)` over the tokens that carry one.

use crate::config::{ModelBlock, Provider};
use crate::error::{EvalError, Result};
use crate::llm::OpenAiClient;
use async_trait::async_trait;

/// Something that can score the fluency of a text.
#[async_trait]
pub trait PerplexityScorer: Send + Sync {
    /// `None` when the text yields no usable token scores.
    async fn perplexity(&self, text: &str) -> Result<Option<f64>>;
}

/// Perplexity via an OpenAI-compatible `/completions` endpoint.
pub struct LogprobPerplexity {
    client: OpenAiClient,
}

impl LogprobPerplexity {
    /// Resolve the block's provider; only OpenAI-compatible servers expose
    /// prompt logprobs.
    pub fn new(block: &ModelBlock) -> Result<Self> {
        let client = match block.provider()? {
            Provider::OpenAi => OpenAiClient::hosted(block)?,
            Provider::Vllm => OpenAiClient::self_hosted(block)?,
            Provider::Ollama => {
                return Err(EvalError::ScorerUnavailable {
                    name: "perplexity",
                    reason: format!("provider '{}' has no prompt logprobs", block.provider),
                });
            }
        };
        Ok(Self { client })
    }
}

#[async_trait]
impl PerplexityScorer for LogprobPerplexity {
    async fn perplexity(&self, text: &str) -> Result<Option<f64>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let logprobs = self.client.prompt_logprobs(text).await?;
        Ok(perplexity_from_logprobs(&logprobs))
    }
}

/// `exp(-mean)` of the present logprobs; `None` if none are present or the
/// result is not finite.
pub fn perplexity_from_logprobs(logprobs: &[Option<f64>]) -> Option<f64> {
    let scored: Vec<f64> = logprobs.iter().flatten().copied().collect();
    if scored.is_empty() {
        return None;
    }
    let mean = scored.iter().sum::<f64>() / scored.len() as f64;
    Some((-mean).exp()).filter(|p| p.is_finite())
}
