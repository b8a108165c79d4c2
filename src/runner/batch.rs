//! Sequential runner: one outstanding call, input order preserved.

use super::infer_one;
use crate::dataset::Example;
use crate::error::Result;
use crate::guard::SchemaGuard;
use crate::llm::ChatModel;
use crate::store::{self, InferenceRecord};
use crate::template::PromptTemplate;
use std::path::Path;

/// Runs examples through one model strictly in order.
pub struct BatchRunner<M> {
    model: M,
    template: PromptTemplate,
    guard: SchemaGuard,
    tag: String,
}

impl<M: ChatModel> BatchRunner<M> {
    pub fn new(model: M, template: PromptTemplate, tag: impl Into<String>) -> Self {
        Self {
            model,
            template,
            guard: SchemaGuard::new(),
            tag: tag.into(),
        }
    }

    pub fn with_guard(mut self, guard: SchemaGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Produce one record per example, in input order.
    pub async fn run(&self, examples: &[Example]) -> Result<Vec<InferenceRecord>> {
        let mut records = Vec::with_capacity(examples.len());

        for (i, example) in examples.iter().enumerate() {
            let record = infer_one(
                &self.model,
                &self.template,
                &self.guard,
                &self.tag,
                example.clone(),
            )
            .await?;
            tracing::debug!(
                progress = i + 1,
                total = examples.len(),
                blocked = record.blocked,
                "example done"
            );
            records.push(record);
        }

        Ok(records)
    }

    /// Run and write the whole record set to `out`; returns the record count.
    pub async fn run_to_file(&self, examples: &[Example], out: &Path) -> Result<usize> {
        let records = self.run(examples).await?;
        store::write_jsonl(out, &records)?;

        let blocked = records.iter().filter(|r| r.blocked).count();
        tracing::info!(tag = %self.tag, records = records.len(), blocked, "batch complete");
        Ok(records.len())
    }
}
