//! Schema guard: turn raw model text into a validated [`WellnessOutput`].
//!
//! The guard extracts a JSON object from the text, deserializes it and runs
//! the field checks. When that fails it re-asks the model a bounded number
//! of times with the list of violations before giving up.

use crate::llm::{ChatModel, Prompts, fill};
use crate::schema::{ValidationError, WellnessOutput};

/// Default number of re-asks after the first failed validation.
pub const DEFAULT_REASKS: usize = 1;

/// Validates model output, re-asking on failure.
#[derive(Debug, Clone)]
pub struct SchemaGuard {
    num_reasks: usize,
    system: String,
}

impl Default for SchemaGuard {
    fn default() -> Self {
        Self {
            num_reasks: DEFAULT_REASKS,
            system: Prompts::coach_system().to_string(),
        }
    }
}

impl SchemaGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reasks(mut self, num_reasks: usize) -> Self {
        self.num_reasks = num_reasks;
        self
    }

    /// System prompt used for re-asks.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// Validate raw text without contacting the model.
    pub fn check(raw: &str) -> Result<WellnessOutput, ValidationError> {
        let json = extract_json(raw).ok_or_else(|| {
            ValidationError::single("$", "no JSON object found in model output")
        })?;

        let output: WellnessOutput = serde_json::from_str(&json)
            .map_err(|e| ValidationError::single("$", format!("invalid JSON: {}", e)))?;

        output.validate()
    }

    /// Validate `raw`, re-asking `model` up to the configured number of times.
    ///
    /// A failed re-ask call (transport or HTTP error) ends the attempt with the
    /// last validation error; it never escapes as a transport failure.
    pub async fn parse(
        &self,
        model: &dyn ChatModel,
        raw: &str,
    ) -> Result<WellnessOutput, ValidationError> {
        let mut current = raw.to_string();
        let mut attempt = 0;

        loop {
            let err = match Self::check(&current) {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };

            if attempt >= self.num_reasks {
                return Err(err);
            }
            attempt += 1;

            tracing::debug!(attempt, errors = %err, "output failed validation, re-asking");
            let errors = err.to_string();
            let prompt = fill(
                Prompts::guard_reask(),
                &[("errors", errors.as_str()), ("previous", current.as_str())],
            );

            match model.generate(&self.system, &prompt).await {
                Ok(text) => current = text,
                Err(call_err) => {
                    tracing::warn!(error = %call_err, "re-ask call failed");
                    return Err(err);
                }
            }
        }
    }
}

/// Extract the JSON object from an LLM reply.
///
/// Handles ```json fences, bare fences and prose around a `{...}` span.
pub fn extract_json(response: &str) -> Option<String> {
    let response = response.trim();

    let unfenced = if let Some(rest) = response.strip_prefix("```json") {
        rest.rfind("```").map(|end| rest[..end].trim())
    } else if let Some(rest) = response.strip_prefix("```") {
        let body_start = rest.find('\n').map(|n| n + 1).unwrap_or(0);
        rest.rfind("```")
            .filter(|end| *end >= body_start)
            .map(|end| rest[body_start..end].trim())
    } else {
        None
    };
    let text = unfenced.unwrap_or(response);

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, valid_json, valid_output};

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json(r#"{"a":1}"#).unwrap(), r#"{"a":1}"#);
        assert_eq!(
            extract_json("```json\n{\"a\":1}\n```").unwrap(),
            r#"{"a":1}"#
        );
        assert_eq!(extract_json("```\n{\"a\":1}\n```").unwrap(), r#"{"a":1}"#);
        assert_eq!(
            extract_json("Sure! Here it is: {\"a\": {\"b\": 2}} hope it helps").unwrap(),
            r#"{"a": {"b": 2}}"#
        );
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn test_check_accepts_well_formed_payload() {
        let raw = format!("Here you go:\n```json\n{}\n```", valid_json());
        let out = SchemaGuard::check(&raw).unwrap();
        assert!(out.disclaimer.to_lowercase().contains("not medical advice"));
        assert!((1..=5).contains(&out.suggestions.len()));
    }

    #[test]
    fn test_check_rejects_prose() {
        let err = SchemaGuard::check("Get more sleep and drink water.").unwrap_err();
        assert_eq!(err.errors[0].path, "$");
    }

    #[tokio::test]
    async fn test_valid_output_needs_no_reask() {
        let model = Scripted::new(&[]);
        let out = SchemaGuard::new().parse(&model, &valid_json()).await.unwrap();
        assert_eq!(out, valid_output());
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_reask_repairs_output() {
        let fixed = valid_json();
        let model = Scripted::new(&[fixed.as_str()]);
        let out = SchemaGuard::new()
            .parse(&model, r#"{"summary": "short"}"#)
            .await
            .unwrap();
        assert_eq!(out, valid_output());

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains(r#"{"summary": "short"}"#));
    }

    #[tokio::test]
    async fn test_gives_up_after_one_reask() {
        let model = Scripted::new(&["still prose", "would be valid too late"]);
        let err = SchemaGuard::new()
            .parse(&model, "plain prose")
            .await
            .unwrap_err();
        assert_eq!(err.errors[0].path, "$");
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reask_transport_failure_is_a_validation_failure() {
        let model = Scripted::new(&[]);
        let result = SchemaGuard::new().parse(&model, "prose").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_zero_reasks() {
        let model = Scripted::new(&[]);
        let result = SchemaGuard::new().with_reasks(0).parse(&model, "prose").await;
        assert!(result.is_err());
        assert!(model.prompts.lock().unwrap().is_empty());
    }
}
