//! Configuration for the evaluation harness.
//!
//! Model blocks live in a YAML file (`configs/model.yaml` by default) keyed
//! `mut`, `baseline` and `judge`, with an optional `ppl` block for the
//! perplexity scorer. The judge rubric lives in a second YAML file.
//! A `.env` file, when present, is loaded before any environment lookups.

use crate::error::{EvalError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default model config location, relative to the working directory.
pub const DEFAULT_MODEL_CONFIG: &str = "configs/model.yaml";

/// Default judge rubric location, relative to the working directory.
pub const DEFAULT_RUBRIC: &str = "configs/judge.yaml";

pub const DEFAULT_TEMPERATURE: f32 = 0.6;
pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_JUDGE_PROMPTS: usize = 3;

/// Backend families a model block can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Hosted OpenAI chat completions.
    OpenAi,
    /// Self-hosted OpenAI-compatible server at `base_url`.
    Vllm,
    /// Local Ollama `/api/chat`.
    Ollama,
}

impl FromStr for Provider {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "vllm" => Ok(Provider::Vllm),
            "ollama" => Ok(Provider::Ollama),
            other => Err(EvalError::UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::OpenAi => "openai",
            Provider::Vllm => "vllm",
            Provider::Ollama => "ollama",
        };
        f.write_str(name)
    }
}

/// A callable backend and its generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBlock {
    /// Provider tag, e.g. "openai", "vllm", "ollama" (case-insensitive).
    pub provider: String,

    /// Model name passed to the backend.
    pub model: String,

    /// Endpoint override (required in practice for vllm).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// API key; falls back to `OPENAI_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Number of judge prompts per item (judge block only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_prompts: Option<usize>,
}

impl ModelBlock {
    /// Create a block with only provider and model set.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            base_url: None,
            temperature: None,
            max_tokens: None,
            api_key: None,
            n_prompts: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Resolve the provider tag.
    pub fn provider(&self) -> Result<Provider> {
        self.provider.parse()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn n_prompts(&self) -> usize {
        self.n_prompts.unwrap_or(DEFAULT_JUDGE_PROMPTS)
    }
}

/// The model blocks used by one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model under test.
    #[serde(rename = "mut")]
    pub mut_block: ModelBlock,
    pub baseline: ModelBlock,
    pub judge: ModelBlock,
    /// Perplexity scorer backend (OpenAI-compatible completions with logprobs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppl: Option<ModelBlock>,
}

/// Loose file layout so that a missing block is reported by name.
#[derive(Debug, Deserialize)]
struct ModelsFile {
    #[serde(rename = "mut")]
    mut_block: Option<ModelBlock>,
    baseline: Option<ModelBlock>,
    judge: Option<ModelBlock>,
    ppl: Option<ModelBlock>,
}

impl ModelsConfig {
    /// Load model blocks from the given path, or from the default locations.
    ///
    /// Lookup order when `path` is `None`:
    /// 1. `configs/model.yaml` in the working directory
    /// 2. `model.yaml` in the per-user config dir (~/.config/wellness-eval/)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        load_dotenv();

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path().ok_or_else(|| {
                EvalError::Config(format!(
                    "No model config found. Create {} or pass --config.",
                    DEFAULT_MODEL_CONFIG
                ))
            })?,
        };

        let content = std::fs::read_to_string(&path).map_err(|e| EvalError::io(&path, e))?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document into model blocks.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ModelsFile = serde_yaml::from_str(content)
            .map_err(|e| EvalError::Config(format!("Failed to parse model config: {}", e)))?;

        Ok(Self {
            mut_block: file
                .mut_block
                .ok_or_else(|| EvalError::MissingBlock("mut".to_string()))?,
            baseline: file
                .baseline
                .ok_or_else(|| EvalError::MissingBlock("baseline".to_string()))?,
            judge: file
                .judge
                .ok_or_else(|| EvalError::MissingBlock("judge".to_string()))?,
            ppl: file.ppl,
        })
    }

    /// Look up a block by its config key.
    pub fn block(&self, name: &str) -> Result<&ModelBlock> {
        match name {
            "mut" => Ok(&self.mut_block),
            "baseline" => Ok(&self.baseline),
            "judge" => Ok(&self.judge),
            "ppl" => self
                .ppl
                .as_ref()
                .ok_or_else(|| EvalError::MissingBlock("ppl".to_string())),
            other => Err(EvalError::MissingBlock(other.to_string())),
        }
    }

    /// Check that every block names a known provider and a model.
    pub fn validate(&self) -> Result<()> {
        let blocks = [
            ("mut", Some(&self.mut_block)),
            ("baseline", Some(&self.baseline)),
            ("judge", Some(&self.judge)),
            ("ppl", self.ppl.as_ref()),
        ];

        for (name, block) in blocks {
            let Some(block) = block else { continue };
            block.provider()?;
            if block.model.trim().is_empty() {
                return Err(EvalError::Config(format!(
                    "Block '{}' has an empty model name",
                    name
                )));
            }
        }

        Ok(())
    }

    fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(DEFAULT_MODEL_CONFIG);
        if local.exists() {
            return Some(local);
        }
        config_dir()
            .map(|dir| dir.join("model.yaml"))
            .filter(|p| p.exists())
    }
}

/// Judge rubric: ordered dimensions with descriptions and their weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rubric {
    pub dimensions: IndexMap<String, String>,
    pub weights: IndexMap<String, f64>,
}

impl Rubric {
    /// Load a rubric from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        let rubric = Self::from_yaml(&content)?;
        rubric.validate()?;
        Ok(rubric)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| EvalError::Config(format!("Failed to parse rubric: {}", e)))
    }

    /// Reject an empty rubric; warn when weights look off.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(EvalError::Config(
                "Rubric must define at least one dimension".to_string(),
            ));
        }

        for name in self.dimensions.keys() {
            if !self.weights.contains_key(name) {
                tracing::warn!(dimension = %name, "rubric dimension has no weight");
            }
        }

        let total: f64 = self.weights.values().sum();
        if (total - 1.0).abs() > 1e-6 {
            tracing::warn!(total, "rubric weights do not sum to 1.0");
        }

        Ok(())
    }

    pub fn dimension_names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.keys().map(String::as_str)
    }

    pub fn weight(&self, dimension: &str) -> f64 {
        self.weights.get(dimension).copied().unwrap_or(0.0)
    }
}

/// Per-user config directory (~/.config/wellness-eval on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "wellness-eval").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Load `.env` from the working directory or its parents, if any.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded .env");
    }
}

/// API key for OpenAI-compatible backends: block value, then `OPENAI_API_KEY`.
pub fn api_key_for(block: &ModelBlock) -> Option<String> {
    block
        .api_key
        .clone()
        .or_else(|| env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.is_empty())
}
