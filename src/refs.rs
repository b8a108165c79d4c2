//! Reference answers written by the judge model.
//!
//! The judge block answers the same coach prompt as the models under test,
//! under an "expert coach" system prompt; its guarded output, flattened to
//! text, becomes the reference for ROUGE and similarity metrics.

use crate::dataset::Example;
use crate::error::Result;
use crate::guard::SchemaGuard;
use crate::llm::{ChatModel, Prompts};
use crate::runner::infer_one;
use crate::store::{self, ReferenceRecord};
use crate::template::PromptTemplate;
use std::path::Path;

/// Default number of examples to write references for.
pub const DEFAULT_REFERENCE_LIMIT: usize = 50;

pub struct ReferenceBuilder<M> {
    model: M,
    template: PromptTemplate,
    guard: SchemaGuard,
}

impl<M: ChatModel> ReferenceBuilder<M> {
    pub fn new(model: M, template: PromptTemplate) -> Self {
        Self {
            model,
            template,
            guard: SchemaGuard::new().with_system(Prompts::reference_system()),
        }
    }

    /// One reference per example; blocked outputs give an empty text.
    pub async fn build(&self, examples: &[Example]) -> Result<Vec<ReferenceRecord>> {
        let mut refs = Vec::with_capacity(examples.len());
        for example in examples {
            let record =
                infer_one(&self.model, &self.template, &self.guard, "reference", example.clone())
                    .await?;
            let reference_text = if record.blocked {
                String::new()
            } else {
                record.parsed.flatten()
            };
            refs.push(ReferenceRecord {
                id: record.id,
                reference_text,
            });
        }
        Ok(refs)
    }

    /// Build references for `examples` and write them to `out`.
    pub async fn build_file(&self, examples: &[Example], out: &Path) -> Result<usize> {
        let refs = self.build(examples).await?;
        store::write_jsonl(out, &refs)?;
        let empty = refs.iter().filter(|r| r.reference_text.is_empty()).count();
        tracing::info!(references = refs.len(), empty, path = %out.display(), "references written");
        Ok(refs.len())
    }
}
