//! Wellness Eval - an evaluation harness comparing two LLM configurations.
//!
//! Two models ("mut", the model under test, and "baseline") answer the same
//! wellness-coaching prompts. Their outputs are validated against a strict
//! JSON schema, then scored by automatic metrics, an LLM judge and human
//! annotators.
//!
//! # Overview
//!
//! 1. Render a prompt template for every dataset example
//! 2. Dispatch it to the configured backend (OpenAI, vLLM or Ollama)
//! 3. Guard the reply: validate, re-ask once on failure, else mark it blocked
//! 4. Persist one [`InferenceRecord`] per example
//! 5. Score the stores: auto metrics, reference metrics, judge, human pairs
//!
//! # Quick Start
//!
//! ```no_run
//! use wellness_eval::{
//!     config::ModelsConfig,
//!     dataset::Dataset,
//!     llm::Backend,
//!     runner::BatchRunner,
//!     template::PromptTemplate,
//! };
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ModelsConfig::load(None)?;
//!     let dataset = Dataset::load_jsonl(Path::new("data/test.jsonl"), None)?;
//!     let template = PromptTemplate::load(Path::new("prompts"), "coach_v1.jinja")?;
//!
//!     let model = Backend::from_block(&config.mut_block)?;
//!     let runner = BatchRunner::new(model, template, "mut_v1");
//!     let n = runner
//!         .run_to_file(&dataset.examples, Path::new("out/infer/mut_v1.jsonl"))
//!         .await?;
//!
//!     println!("Wrote {} records", n);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **llm**: backend clients, provider dispatch and the Ollama retry policy
//! - **guard** / **schema**: output validation with a bounded re-ask
//! - **runner**: sequential and worker-pool inference
//! - **store**: JSONL records, CSV reports, shard merging
//! - **metrics**, **judge**, **refs**, **human**: the scoring stages

pub mod config;
pub mod dataset;
pub mod error;
pub mod guard;
pub mod human;
pub mod judge;
pub mod llm;
pub mod metrics;
pub mod refs;
pub mod runner;
pub mod schema;
pub mod store;
pub mod template;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{ModelBlock, ModelsConfig, Provider, Rubric};
pub use dataset::{Dataset, Example};
pub use error::{EvalError, Result};
pub use guard::SchemaGuard;
pub use judge::LlmJudge;
pub use llm::{Backend, ChatModel, call_chat};
pub use runner::{BatchRunner, ParallelConfig, ParallelRunner};
pub use schema::{Suggestion, ValidationError, WellnessOutput};
pub use store::{InferenceRecord, JudgedRecord, ReferenceRecord};
pub use template::PromptTemplate;
