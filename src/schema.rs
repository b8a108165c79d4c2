//! The structured output a coach model must produce.
//!
//! Values are checked at construction time: [`WellnessOutput::validate`]
//! trims every string and returns either the normalized value or a
//! [`ValidationError`] listing every violated constraint.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Phrase every disclaimer must contain (case-insensitive).
pub const DISCLAIMER_PHRASE: &str = "not medical advice";

const SUMMARY_LEN: (usize, usize) = (30, 500);
const TITLE_LEN: (usize, usize) = (3, 80);
const RATIONALE_LEN: (usize, usize) = (10, 400);
const STEP_LEN: (usize, usize) = (3, 80);
const STEPS_COUNT: (usize, usize) = (1, 6);
const SUGGESTIONS_COUNT: (usize, usize) = (1, 5);

/// One actionable suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub title: String,
    pub rationale: String,
    pub steps: Vec<String>,
}

/// A coach response: summary, 1-5 suggestions and a safety disclaimer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WellnessOutput {
    pub summary: String,
    pub suggestions: Vec<Suggestion>,
    pub disclaimer: String,
}

/// A single violated constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// JSON-path-like location, e.g. `suggestions[1].steps[0]`.
    pub path: String,
    pub message: String,
}

/// All constraint violations found in one output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    /// Build an error with a single violation.
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError {
                path: path.into(),
                message: message.into(),
            }],
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

fn check_len(
    errors: &mut Vec<FieldError>,
    path: impl Into<String>,
    value: &str,
    (min, max): (usize, usize),
) {
    let len = value.chars().count();
    if len < min || len > max {
        errors.push(FieldError {
            path: path.into(),
            message: format!("length {} not within {}..={}", len, min, max),
        });
    }
}

fn check_count(
    errors: &mut Vec<FieldError>,
    path: &str,
    count: usize,
    (min, max): (usize, usize),
) {
    if count < min || count > max {
        errors.push(FieldError {
            path: path.to_string(),
            message: format!("{} entries, expected {}..={}", count, min, max),
        });
    }
}

impl WellnessOutput {
    /// The canonical value recorded for blocked examples.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Trim all strings and check every field constraint.
    pub fn validate(self) -> Result<Self, ValidationError> {
        let mut errors = Vec::new();

        let summary = self.summary.trim().to_string();
        check_len(&mut errors, "summary", &summary, SUMMARY_LEN);

        check_count(
            &mut errors,
            "suggestions",
            self.suggestions.len(),
            SUGGESTIONS_COUNT,
        );

        let mut suggestions = Vec::with_capacity(self.suggestions.len());
        for (i, s) in self.suggestions.into_iter().enumerate() {
            let title = s.title.trim().to_string();
            let rationale = s.rationale.trim().to_string();
            check_len(&mut errors, format!("suggestions[{}].title", i), &title, TITLE_LEN);
            check_len(
                &mut errors,
                format!("suggestions[{}].rationale", i),
                &rationale,
                RATIONALE_LEN,
            );

            let steps_path = format!("suggestions[{}].steps", i);
            check_count(&mut errors, &steps_path, s.steps.len(), STEPS_COUNT);
            let steps: Vec<String> = s.steps.iter().map(|st| st.trim().to_string()).collect();
            for (j, step) in steps.iter().enumerate() {
                check_len(&mut errors, format!("{}[{}]", steps_path, j), step, STEP_LEN);
            }

            suggestions.push(Suggestion {
                title,
                rationale,
                steps,
            });
        }

        let disclaimer = self.disclaimer.trim().to_string();
        if !disclaimer.to_lowercase().contains(DISCLAIMER_PHRASE) {
            errors.push(FieldError {
                path: "disclaimer".to_string(),
                message: format!("must contain \"{}\"", DISCLAIMER_PHRASE),
            });
        }

        if errors.is_empty() {
            Ok(Self {
                summary,
                suggestions,
                disclaimer,
            })
        } else {
            Err(ValidationError { errors })
        }
    }

    /// Whether this is the canonical empty value.
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty() && self.suggestions.is_empty() && self.disclaimer.is_empty()
    }

    /// Render the output as plain text for reference metrics and human review.
    ///
    /// Blank parts are dropped; each suggestion becomes `"{n}. {title}: {rationale}"`
    /// followed by a `"Steps: a; b"` line when it has steps.
    pub fn flatten(&self) -> String {
        let mut parts = vec![self.summary.clone()];
        for (i, s) in self.suggestions.iter().enumerate() {
            parts.push(format!("{}. {}: {}", i + 1, s.title, s.rationale));
            if !s.steps.is_empty() {
                parts.push(format!("Steps: {}", s.steps.join("; ")));
            }
        }
        parts.push(self.disclaimer.clone());

        parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}
