//! Embedding-based similarity: BERTScore-style F1 and sentence cosine.

use crate::error::Result;

/// A local text encoder.
pub trait TextEncoder: Send + Sync {
    /// Mean-pooled, L2-normalized embedding of the whole text.
    fn sentence_embedding(&self, text: &str) -> Result<Vec<f32>>;

    /// Contextual embedding per token, special tokens excluded.
    fn token_embeddings(&self, text: &str) -> Result<Vec<Vec<f32>>>;
}

/// Cosine similarity; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Greedy-matching F1 over token embeddings.
///
/// Precision averages, for each candidate token, its best cosine against the
/// reference tokens; recall does the same the other way round.
pub fn greedy_match_f1(candidate: &[Vec<f32>], reference: &[Vec<f32>]) -> Option<f64> {
    if candidate.is_empty() || reference.is_empty() {
        return None;
    }

    let best = |from: &[Vec<f32>], to: &[Vec<f32>]| -> f64 {
        from.iter()
            .map(|a| {
                to.iter()
                    .map(|b| cosine_similarity(a, b) as f64)
                    .fold(f64::NEG_INFINITY, f64::max)
            })
            .sum::<f64>()
            / from.len() as f64
    };

    let precision = best(candidate, reference);
    let recall = best(reference, candidate);
    if precision + recall <= 0.0 {
        return Some(0.0);
    }
    Some(2.0 * precision * recall / (precision + recall))
}

/// BERTScore-style F1 between candidate and reference.
pub fn bertscore_f1(encoder: &dyn TextEncoder, candidate: &str, reference: &str) -> Result<Option<f64>> {
    let cand = encoder.token_embeddings(candidate)?;
    let refs = encoder.token_embeddings(reference)?;
    Ok(greedy_match_f1(&cand, &refs))
}

/// Cosine between the two sentence embeddings.
pub fn embed_cosine(encoder: &dyn TextEncoder, candidate: &str, reference: &str) -> Result<f64> {
    let a = encoder.sentence_embedding(candidate)?;
    let b = encoder.sentence_embedding(reference)?;
    Ok(cosine_similarity(&a, &b) as f64)
}
