//! LLM-as-judge rubric scoring.
//!
//! Each output is scored `n_prompts` times by the judge model, cycling
//! through a fixed rotation of phrasings. Per-dimension scores are averaged
//! over prompts and combined into a weighted final score.

use crate::config::Rubric;
use crate::error::Result;
use crate::guard::extract_json;
use crate::llm::{ChatModel, Prompts, fill};
use crate::store::{self, InferenceRecord, JudgedRecord};
use indexmap::IndexMap;
use serde_json::Value;
use std::path::Path;

/// Score given when the judge's answer is unusable.
pub const NEUTRAL_SCORE: f64 = 3.0;

const MIN_SCORE: f64 = 1.0;
const MAX_SCORE: f64 = 5.0;

/// Rubric-driven judge over a chat model.
pub struct LlmJudge<M> {
    model: M,
    rubric: Rubric,
    n_prompts: usize,
}

impl<M: ChatModel> LlmJudge<M> {
    /// Create a judge issuing `n_prompts` prompts per output (at least one).
    pub fn new(model: M, rubric: Rubric, n_prompts: usize) -> Self {
        Self {
            model,
            rubric,
            n_prompts: n_prompts.max(1),
        }
    }

    /// Build the prompts sent for one output.
    pub fn prompts(&self, data: &Value, output: &str) -> Vec<String> {
        let names: Vec<&str> = self.rubric.dimension_names().collect();
        let dims = names.join(", ");
        let keys = format!(
            "{{{}}}",
            names
                .iter()
                .map(|d| format!("\"{}\":X", d))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let data = data.to_string();
        let rotation = Prompts::judge_rotation();

        (0..self.n_prompts)
            .map(|i| {
                fill(
                    rotation[i % rotation.len()],
                    &[
                        ("dims", dims.as_str()),
                        ("keys", keys.as_str()),
                        ("data", data.as_str()),
                        ("out", output),
                    ],
                )
            })
            .collect()
    }

    /// Read per-dimension scores from one judge reply.
    ///
    /// Unparseable replies and empty `scores` give the neutral score for every
    /// dimension; a missing or non-numeric dimension counts as neutral and
    /// out-of-range values are clamped to 1..=5.
    pub fn parse_scores(&self, response: &str) -> IndexMap<String, f64> {
        let scores = extract_json(response)
            .and_then(|json| serde_json::from_str::<Value>(&json).ok())
            .and_then(|value| match value.get("scores") {
                Some(Value::Object(map)) if !map.is_empty() => Some(map.clone()),
                _ => None,
            });

        if scores.is_none() {
            tracing::debug!("judge reply unusable, using neutral scores");
        }

        self.rubric
            .dimension_names()
            .map(|dim| {
                let score = scores
                    .as_ref()
                    .and_then(|map| map.get(dim))
                    .and_then(score_value)
                    .map(|s| s.clamp(MIN_SCORE, MAX_SCORE))
                    .unwrap_or(NEUTRAL_SCORE);
                (dim.to_string(), score)
            })
            .collect()
    }

    /// Score one output; returns mean per dimension and the weighted final.
    ///
    /// Judge call failures propagate.
    pub async fn score(&self, data: &Value, output: &str) -> Result<(IndexMap<String, f64>, f64)> {
        let prompts = self.prompts(data, output);
        let mut totals: IndexMap<String, f64> = self
            .rubric
            .dimension_names()
            .map(|d| (d.to_string(), 0.0))
            .collect();

        for prompt in &prompts {
            let reply = self.model.generate(Prompts::judge_system(), prompt).await?;
            for (dim, score) in self.parse_scores(&reply) {
                *totals.entry(dim).or_insert(0.0) += score;
            }
        }

        let n = prompts.len() as f64;
        let means: IndexMap<String, f64> = totals.into_iter().map(|(d, t)| (d, t / n)).collect();
        let final_score: f64 = means.iter().map(|(d, m)| m * self.rubric.weight(d)).sum();

        Ok((means, final_score))
    }

    /// Judge one inference record.
    pub async fn judge_record(&self, record: &InferenceRecord) -> Result<JudgedRecord> {
        let data = serde_json::to_value(&record.input)?;
        let (dim_scores, final_score) = self.score(&data, &record.raw).await?;
        tracing::debug!(id = %record.id, final_score, "judged");

        Ok(JudgedRecord {
            id: record.id.clone(),
            tag: record.tag.clone(),
            blocked: record.blocked,
            dim_scores,
            final_score,
        })
    }

    /// Judge every record of an inference store and write the judged store.
    pub async fn judge_file(&self, infile: &Path, outfile: &Path) -> Result<usize> {
        let records = store::load_inference(infile)?;
        let mut judged = Vec::with_capacity(records.len());
        for record in &records {
            judged.push(self.judge_record(record).await?);
        }
        store::write_jsonl(outfile, &judged)?;
        Ok(judged.len())
    }
}

fn score_value(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    score.filter(|s| s.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Example;
    use crate::error::EvalError;
    use crate::testing::{Scripted, valid_output};

    const RUBRIC: &str = r#"
dimensions:
  helpfulness: Actionable advice
  safety: No medical claims
weights:
  helpfulness: 0.6
  safety: 0.4
"#;

    fn judge(model: Scripted, n: usize) -> LlmJudge<Scripted> {
        LlmJudge::new(model, Rubric::from_yaml(RUBRIC).unwrap(), n)
    }

    #[test]
    fn test_prompts_rotate_and_list_dimensions() {
        let j = judge(Scripted::new(&[]), 4);
        let prompts = j.prompts(&serde_json::json!({"rhr": 60}), "OUT");

        assert_eq!(prompts.len(), 4);
        assert!(prompts[0].starts_with("You are a strict evaluator"));
        assert!(prompts[1].starts_with("Evaluate per rubric"));
        assert!(prompts[2].starts_with("As an expert reviewer"));
        assert_eq!(prompts[3], prompts[0]);
        assert!(prompts[0].contains("helpfulness, safety"));
        assert!(prompts[0].contains(r#"{"helpfulness":X, "safety":X}"#));
        assert!(prompts[0].contains(r#"DATA: {"rhr":60}"#));
        assert!(prompts[0].ends_with("OUTPUT: OUT"));
    }

    #[test]
    fn test_parse_scores_edge_cases() {
        let j = judge(Scripted::new(&[]), 1);

        let s = j.parse_scores(r#"{"scores": {"helpfulness": 5, "safety": 4}, "notes": ""}"#);
        assert_eq!(s["helpfulness"], 5.0);
        assert_eq!(s["safety"], 4.0);

        let s = j.parse_scores("Sure: {\"scores\": {\"helpfulness\": 9, \"safety\": \"0\"}}");
        assert_eq!(s["helpfulness"], 5.0);
        assert_eq!(s["safety"], 1.0);

        let s = j.parse_scores(r#"{"scores": {"helpfulness": 2}}"#);
        assert_eq!(s["safety"], NEUTRAL_SCORE);

        for bad in ["no json", r#"{"scores": {}}"#, r#"{"notes": "x"}"#, "{broken"] {
            let s = j.parse_scores(bad);
            assert!(s.values().all(|v| *v == NEUTRAL_SCORE), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_score_means_and_weighted_final() {
        let model = Scripted::new(&[
            r#"{"scores": {"helpfulness": 5, "safety": 3}}"#,
            r#"{"scores": {"helpfulness": 3, "safety": 5}}"#,
            "garbage",
        ]);
        let j = judge(model, 3);

        let (dims, final_score) = j.score(&serde_json::json!({}), "out").await.unwrap();

        assert!((dims["helpfulness"] - 11.0 / 3.0).abs() < 1e-9);
        assert!((dims["safety"] - 11.0 / 3.0).abs() < 1e-9);
        assert!((final_score - 11.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_judge_record_carries_identity() {
        let model = Scripted::new(&[r#"{"scores": {"helpfulness": 4, "safety": 2}}"#]);
        let j = judge(model, 1);
        let record = InferenceRecord::new(
            "mut_v1",
            Example::new("ex1").with_field("rhr", 60),
            "raw".into(),
            Ok(valid_output()),
        );

        let judged = j.judge_record(&record).await.unwrap();
        assert_eq!(judged.id, "ex1");
        assert_eq!(judged.tag, "mut_v1");
        assert!(!judged.blocked);
        assert!((judged.final_score - (4.0 * 0.6 + 2.0 * 0.4)).abs() < 1e-9);

        let prompts = j.model.prompts.lock().unwrap();
        assert!(prompts[0].contains(r#""id":"ex1""#));
    }

    #[tokio::test]
    async fn test_judge_transport_error_propagates() {
        let j = judge(Scripted::new(&[]), 2);
        let err = j.score(&serde_json::json!({}), "out").await.unwrap_err();
        assert!(matches!(err, EvalError::Transport(_)));
    }
}
