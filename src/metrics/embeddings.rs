//! Local sentence-transformers encoder using candle.

use super::similarity::TextEncoder;
use crate::error::{EvalError, Result};
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::Tokenizer;

/// Default encoder for similarity metrics.
pub const MINILM_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

fn unavailable(reason: impl std::fmt::Display) -> EvalError {
    EvalError::ScorerUnavailable {
        name: "encoder",
        reason: reason.to_string(),
    }
}

/// BERT-family encoder loaded from the Hugging Face Hub.
pub struct MiniLmEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl MiniLmEncoder {
    /// Load all-MiniLM-L6-v2.
    pub fn load_minilm() -> Result<Self> {
        Self::load(MINILM_MODEL)
    }

    /// Load a sentence-transformers model by name.
    pub fn load(model_id: &str) -> Result<Self> {
        let device = Device::Cpu;

        let api = Api::new().map_err(unavailable)?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config_path = repo.get("config.json").map_err(unavailable)?;
        let tokenizer_path = repo.get("tokenizer.json").map_err(unavailable)?;
        let weights_path = repo.get("model.safetensors").map_err(unavailable)?;

        let config_text =
            std::fs::read_to_string(&config_path).map_err(|e| EvalError::io(&config_path, e))?;
        let config: BertConfig = serde_json::from_str(&config_text).map_err(unavailable)?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(unavailable)?;

        // SAFETY: the weights file is owned by the hub cache and not mutated while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .map_err(unavailable)?
        };
        let model = BertModel::load(vb, &config).map_err(unavailable)?;

        tracing::info!(model = model_id, "loaded local encoder");
        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Hidden states for one text: `(seq_len, dim)`.
    fn hidden_states(&self, text: &str) -> Result<Tensor> {
        let encoding = self.tokenizer.encode(text, true).map_err(unavailable)?;
        let ids = encoding.get_ids().to_vec();
        let len = ids.len();

        let input_ids = Tensor::from_vec(ids, (1, len), &self.device).map_err(unavailable)?;
        let token_type_ids = input_ids.zeros_like().map_err(unavailable)?;
        let attention_mask = input_ids.ones_like().map_err(unavailable)?;

        self.model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .and_then(|out| out.squeeze(0))
            .map_err(unavailable)
    }
}

impl TextEncoder for MiniLmEncoder {
    fn sentence_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let hidden = self.hidden_states(text)?;
        let pooled = hidden
            .mean(0)
            .and_then(|m| {
                let norm = m.sqr()?.sum_all()?.sqrt()?;
                m.broadcast_div(&norm)
            })
            .and_then(|m| m.to_vec1::<f32>())
            .map_err(unavailable)?;
        Ok(pooled)
    }

    fn token_embeddings(&self, text: &str) -> Result<Vec<Vec<f32>>> {
        let rows = self
            .hidden_states(text)?
            .to_vec2::<f32>()
            .map_err(unavailable)?;
        // drop [CLS] and [SEP]
        if rows.len() <= 2 {
            return Ok(Vec::new());
        }
        Ok(rows[1..rows.len() - 1].to_vec())
    }
}
