//! Inference runners.
//!
//! Both runners push every example through the same pipeline:
//! render the prompt, dispatch it, guard the reply, build a record.
//! [`BatchRunner`] does this one example at a time; [`ParallelRunner`]
//! spreads work units over a fixed pool of tokio workers.

mod batch;
mod parallel;

pub use batch::BatchRunner;
pub use parallel::{ParallelConfig, ParallelRunner, ParallelSummary};

use crate::dataset::Example;
use crate::error::Result;
use crate::guard::SchemaGuard;
use crate::llm::ChatModel;
use crate::store::InferenceRecord;
use crate::template::PromptTemplate;

/// Run one example end to end.
///
/// Render and dispatch failures are returned as errors. A reply that fails
/// the guard becomes a blocked record instead.
pub async fn infer_one(
    model: &dyn ChatModel,
    template: &PromptTemplate,
    guard: &SchemaGuard,
    tag: &str,
    example: Example,
) -> Result<InferenceRecord> {
    let prompt = template.render(&example)?;

    tracing::debug!(id = %example.id, tag, "dispatching");
    let raw = model.generate(guard.system(), &prompt).await?;

    let parsed = guard.parse(model, &raw).await;
    if let Err(err) = &parsed {
        tracing::warn!(id = %example.id, tag, errors = %err, "output blocked");
    }

    Ok(InferenceRecord::new(tag, example, raw, parsed))
}
