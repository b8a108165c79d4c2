//! Reference-based metrics for inference stores.

use super::perplexity::PerplexityScorer;
use super::rouge::RougeL;
use super::similarity::{self, TextEncoder};
use crate::error::Result;
use crate::store::{self, InferenceRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Column order of the reference-metrics CSV.
pub const REFERENCE_HEADER: [&str; 5] = ["id", "rougeL_f", "bertscore_f1", "embed_cosine", "ppl_gpt2"];

/// One row of the reference-metrics CSV; `None` means "not computed".
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ReferenceMetricRow {
    pub id: String,
    #[serde(rename = "rougeL_f")]
    pub rouge_l_f: Option<f64>,
    pub bertscore_f1: Option<f64>,
    pub embed_cosine: Option<f64>,
    pub ppl_gpt2: Option<f64>,
}

/// Optional scorers found usable by [`probe`](super::probe).
#[derive(Default)]
pub struct ReferenceMetrics {
    rouge: RougeL,
    encoder: Option<Box<dyn TextEncoder>>,
    perplexity: Option<Box<dyn PerplexityScorer>>,
}

impl ReferenceMetrics {
    /// ROUGE-L only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoder(mut self, encoder: Box<dyn TextEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn with_perplexity(mut self, scorer: Box<dyn PerplexityScorer>) -> Self {
        self.perplexity = Some(scorer);
        self
    }

    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn has_perplexity(&self) -> bool {
        self.perplexity.is_some()
    }

    /// Score one candidate against its reference.
    pub async fn score(&self, id: &str, candidate: &str, reference: &str) -> ReferenceMetricRow {
        let candidate = candidate.trim();
        let reference = reference.trim();
        let mut row = ReferenceMetricRow {
            id: id.to_string(),
            ..Default::default()
        };

        if candidate.is_empty() {
            row.rouge_l_f = Some(0.0);
            return row;
        }

        row.ppl_gpt2 = self.perplexity(id, candidate).await;
        if reference.is_empty() {
            return row;
        }

        row.rouge_l_f = Some(self.rouge.f_measure(reference, candidate));

        if let Some(encoder) = &self.encoder {
            row.bertscore_f1 = similarity::bertscore_f1(encoder.as_ref(), candidate, reference)
                .unwrap_or_else(|e| {
                    tracing::warn!(id, error = %e, "bertscore failed");
                    None
                });
            row.embed_cosine = similarity::embed_cosine(encoder.as_ref(), candidate, reference)
                .map_err(|e| tracing::warn!(id, error = %e, "embedding cosine failed"))
                .ok();
        }

        row
    }

    async fn perplexity(&self, id: &str, text: &str) -> Option<f64> {
        let scorer = self.perplexity.as_ref()?;
        scorer.perplexity(text).await.unwrap_or_else(|e| {
            tracing::warn!(id, error = %e, "perplexity failed");
            None
        })
    }

    /// Score records that have a reference entry, in store order.
    ///
    /// `limit` counts records read (0 = all), not rows produced.
    pub async fn score_records(
        &self,
        records: &[InferenceRecord],
        references: &HashMap<String, String>,
        limit: usize,
    ) -> Vec<ReferenceMetricRow> {
        let limit = if limit == 0 { usize::MAX } else { limit };
        let mut rows = Vec::new();
        for record in records.iter().take(limit) {
            let Some(reference) = references.get(&record.id) else {
                continue;
            };
            let candidate = record.parsed.flatten();
            rows.push(self.score(&record.id, &candidate, reference).await);
        }
        rows
    }

    /// Score an inference store and write `out_csv`; returns the row count.
    pub async fn run_file(
        &self,
        infile: &Path,
        references: &HashMap<String, String>,
        out_csv: &Path,
        limit: usize,
    ) -> Result<usize> {
        let records = store::load_inference(infile)?;
        let rows = self.score_records(&records, references, limit).await;
        store::write_csv(out_csv, &rows, &REFERENCE_HEADER)?;
        tracing::info!(rows = rows.len(), path = %out_csv.display(), "reference metrics written");
        Ok(rows.len())
    }
}
