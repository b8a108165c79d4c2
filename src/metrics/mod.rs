//! Automatic metrics over inference stores.
//!
//! - [`AutoMetrics`]: reference-free checks (length, disclaimer, safety keywords)
//! - [`ReferenceMetrics`]: ROUGE-L against reference texts, plus embedding
//!   similarity and perplexity when those scorers are available
//!
//! Optional scorers are probed once with [`probe`]; a scorer that cannot be
//! built is left out and its columns stay empty.

mod auto;
#[cfg(feature = "local-models")]
mod embeddings;
mod perplexity;
mod reference;
mod rouge;
mod similarity;

pub use auto::{AUTO_HEADER, AutoMetricRow, AutoMetrics, DISCLAIMER_SENTENCE};
#[cfg(feature = "local-models")]
pub use embeddings::{MINILM_MODEL, MiniLmEncoder};
pub use perplexity::{LogprobPerplexity, PerplexityScorer, perplexity_from_logprobs};
pub use reference::{REFERENCE_HEADER, ReferenceMetricRow, ReferenceMetrics};
pub use rouge::RougeL;
pub use similarity::{TextEncoder, bertscore_f1, cosine_similarity, embed_cosine, greedy_match_f1};

use crate::config::ModelBlock;

/// Text used to check that a perplexity endpoint answers with logprobs.
const PROBE_TEXT: &str = "Take a short walk after lunch.";

/// Build [`ReferenceMetrics`] with every optional scorer that works here.
///
/// The perplexity scorer needs `ppl_block` (and `skip_ppl` unset); it is
/// kept only if a probe request succeeds. The local encoder needs the
/// `local-models` feature and a reachable model hub or cache.
pub async fn probe(ppl_block: Option<&ModelBlock>, skip_ppl: bool) -> ReferenceMetrics {
    let mut metrics = ReferenceMetrics::new();

    match probe_encoder() {
        Some(encoder) => metrics = metrics.with_encoder(encoder),
        None => tracing::info!("embedding scorers unavailable; bertscore_f1 and embed_cosine left empty"),
    }

    if skip_ppl {
        tracing::info!("perplexity skipped by request");
        return metrics;
    }
    let Some(block) = ppl_block else {
        tracing::info!("no ppl block configured; ppl_gpt2 left empty");
        return metrics;
    };

    let scorer = match LogprobPerplexity::new(block) {
        Ok(scorer) => scorer,
        Err(e) => {
            tracing::info!(error = %e, "perplexity scorer unavailable");
            return metrics;
        }
    };
    match scorer.perplexity(PROBE_TEXT).await {
        Ok(_) => {
            tracing::info!(model = %block.model, "perplexity scorer available");
            metrics.with_perplexity(Box::new(scorer))
        }
        Err(e) => {
            tracing::info!(error = %e, "perplexity endpoint did not answer the probe");
            metrics
        }
    }
}

#[cfg(feature = "local-models")]
fn probe_encoder() -> Option<Box<dyn TextEncoder>> {
    match MiniLmEncoder::load_minilm() {
        Ok(encoder) => Some(Box::new(encoder)),
        Err(e) => {
            tracing::info!(error = %e, "local encoder failed to load");
            None
        }
    }
}

#[cfg(not(feature = "local-models"))]
fn probe_encoder() -> Option<Box<dyn TextEncoder>> {
    tracing::debug!("built without the local-models feature");
    None
}
