//! Evaluation dataset loading.
//!
//! A dataset is a JSONL file: one object per line with a stable `id` and
//! arbitrary fields the prompt templates refer to by name.

use crate::error::{EvalError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// A single input example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Join key carried through every downstream record.
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    /// Every other field, available to templates by name.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Example {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Accept string or integer ids, normalizing to a string.
fn id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "id must be a string or number, got {}",
            other
        ))),
    }
}

/// A collection of examples loaded from one file.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Dataset name (file stem).
    pub name: String,
    pub examples: Vec<Example>,
}

impl Dataset {
    pub fn new(name: &str, examples: Vec<Example>) -> Self {
        Self {
            name: name.to_string(),
            examples,
        }
    }

    /// Number of examples in the dataset.
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Keep only the first `n` examples.
    pub fn take(&self, n: usize) -> Self {
        Self {
            name: self.name.clone(),
            examples: self.examples.iter().take(n).cloned().collect(),
        }
    }

    /// Load a JSONL dataset, optionally stopping after `limit` examples.
    ///
    /// Blank lines are skipped; a malformed line is an error naming its line number.
    pub fn load_jsonl(path: &Path, limit: Option<usize>) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        let limit = limit.filter(|n| *n > 0).unwrap_or(usize::MAX);

        let mut examples = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            if examples.len() >= limit {
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let example: Example = serde_json::from_str(line).map_err(|e| {
                EvalError::Dataset(format!(
                    "{}:{}: invalid example: {}",
                    path.display(),
                    line_num + 1,
                    e
                ))
            })?;
            examples.push(example);
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string());

        Ok(Self::new(&name, examples))
    }

    /// Fail if any id appears twice; downstream joins rely on unique ids.
    pub fn ensure_unique_ids(&self) -> Result<()> {
        ensure_unique_ids(&self.examples, &format!("dataset '{}'", self.name))
    }
}

/// Fail on the first id that appears twice in `examples`.
pub fn ensure_unique_ids(examples: &[Example], source: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for example in examples {
        if !seen.insert(example.id.as_str()) {
            return Err(EvalError::Dataset(format!(
                "duplicate id '{}' in {}",
                example.id, source
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DATA: &str = r#"{"id":"ex0","rhr":61,"subjective_stress":"low"}

{"id":"ex1","rhr":72,"subjective_stress":"high"}
{"id":7,"rhr":55}
"#;

    fn write_dataset(content: &str) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_jsonl() {
        let (_dir, path) = write_dataset(DATA);
        let ds = Dataset::load_jsonl(&path, None).unwrap();
        assert_eq!(ds.name, "test");
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.examples[1].fields["subjective_stress"], "high");
        assert_eq!(ds.examples[2].id, "7");
    }

    #[test]
    fn test_limit() {
        let (_dir, path) = write_dataset(DATA);
        assert_eq!(Dataset::load_jsonl(&path, Some(2)).unwrap().len(), 2);
        assert_eq!(Dataset::load_jsonl(&path, Some(0)).unwrap().len(), 3);
        assert_eq!(Dataset::load_jsonl(&path, None).unwrap().take(1).len(), 1);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let (_dir, path) = write_dataset("{\"id\":\"a\"}\nnot json\n");
        let err = Dataset::load_jsonl(&path, None).unwrap_err();
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn test_missing_id_rejected() {
        let (_dir, path) = write_dataset("{\"rhr\":60}\n");
        assert!(Dataset::load_jsonl(&path, None).is_err());
    }

    #[test]
    fn test_duplicate_ids() {
        let ds = Dataset::new("d", vec![Example::new("a"), Example::new("a")]);
        assert!(ds.ensure_unique_ids().is_err());
        let ds = Dataset::new("d", vec![Example::new("a"), Example::new("b")]);
        assert!(ds.ensure_unique_ids().is_ok());
    }

    #[test]
    fn test_example_serializes_flat() {
        let ex = Example::new("ex1").with_field("rhr", 60);
        let json = serde_json::to_value(&ex).unwrap();
        assert_eq!(json, serde_json::json!({"id": "ex1", "rhr": 60}));
    }
}
