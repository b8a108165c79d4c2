//! Record persistence: JSONL stores, CSV reports and shard merging.
//!
//! Every writer produces the complete file in a temporary sibling and then
//! renames it into place, so an interrupted run never leaves a half-written
//! output behind.

use crate::dataset::Example;
use crate::error::{EvalError, Result};
use crate::schema::WellnessOutput;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One model output for one example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRecord {
    pub id: String,
    /// Which configuration produced it, e.g. "mut_v1".
    pub tag: String,
    pub input: Example,
    pub raw: String,
    /// Canonical empty value when `blocked`.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub parsed: WellnessOutput,
    pub blocked: bool,
}

impl InferenceRecord {
    /// Build a record from a guard outcome; failures become blocked records.
    pub fn new(
        tag: &str,
        input: Example,
        raw: String,
        parsed: std::result::Result<WellnessOutput, crate::schema::ValidationError>,
    ) -> Self {
        let (parsed, blocked) = match parsed {
            Ok(output) => (output, false),
            Err(_) => (WellnessOutput::empty(), true),
        };
        Self {
            id: input.id.clone(),
            tag: tag.to_string(),
            input,
            raw,
            parsed,
            blocked,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<WellnessOutput, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<WellnessOutput>::deserialize(deserializer)?.unwrap_or_default())
}

/// Judge scores for one inference record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgedRecord {
    pub id: String,
    pub tag: String,
    pub blocked: bool,
    /// Mean score per rubric dimension, in rubric order.
    pub dim_scores: IndexMap<String, f64>,
    /// Weighted sum of `dim_scores`.
    #[serde(rename = "final")]
    pub final_score: f64,
}

/// Reference answer text for one example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: String,
    pub reference_text: String,
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
        }
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Write `bytes` to `path` through a temporary sibling and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = temp_sibling(path);
    fs::write(&tmp, bytes).map_err(|e| EvalError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| EvalError::io(path, e))?;
    Ok(())
}

/// Write records as JSON lines.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)
            .map_err(|e| EvalError::Serialization(e.to_string()))?;
        buf.push(b'\n');
    }
    write_atomic(path, &buf)
}

/// JSON with `", "` and `": "` separators and every non-ASCII character
/// written as a `\uXXXX` escape.
struct SpacedAscii;

impl serde_json::ser::Formatter for SpacedAscii {
    fn begin_array_value<W: ?Sized + std::io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> std::io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + std::io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> std::io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + std::io::Write>(
        &mut self,
        writer: &mut W,
    ) -> std::io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + std::io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> std::io::Result<()> {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Serialize `value` on one line in the spaced, ASCII-only layout used for
/// length-based metrics.
pub fn to_spaced_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedAscii);
    value
        .serialize(&mut ser)
        .map_err(|e| EvalError::Serialization(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| EvalError::Serialization(e.to_string()))
}

/// Read every non-blank line of a JSONL file.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                EvalError::Serialization(format!("{}:{}: {}", path.display(), i + 1, e))
            })
        })
        .collect()
}

/// Load an inference store.
pub fn load_inference(path: &Path) -> Result<Vec<InferenceRecord>> {
    read_jsonl(path)
}

/// Load references as an id → text map.
pub fn load_references(path: &Path) -> Result<HashMap<String, String>> {
    let refs: Vec<ReferenceRecord> = read_jsonl(path)?;
    Ok(refs.into_iter().map(|r| (r.id, r.reference_text)).collect())
}

/// Index inference records by id; later duplicates replace earlier ones.
pub fn index_by_id(records: Vec<InferenceRecord>) -> HashMap<String, InferenceRecord> {
    records.into_iter().map(|r| (r.id.clone(), r)).collect()
}

/// Write rows as CSV with a header taken from the row type's field names.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T], header: &[&str]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| EvalError::Csv(e.to_string()))?;
    write_atomic(path, &bytes)
}

/// Path of worker `n`'s shard inside `dir`.
pub fn shard_path(dir: &Path, n: usize) -> PathBuf {
    dir.join(format!("shard-{:05}.jsonl", n))
}

/// Remove worker shards (`shard-*.jsonl`) left in `dir` by an earlier run.
///
/// Other files are left alone. Returns how many shards were removed.
pub fn clear_shards(dir: &Path) -> Result<usize> {
    let stale: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|p| {
            p.is_file()
                && p.extension().and_then(|e| e.to_str()) == Some("jsonl")
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("shard-"))
        })
        .collect();

    for shard in &stale {
        fs::remove_file(shard).map_err(|e| EvalError::io(shard, e))?;
    }
    Ok(stale.len())
}

/// Merge shard files from `indir` into one JSONL file.
///
/// Shards (`*.json`, `*.jsonl`) are read in sorted path order. Blank and
/// malformed lines are skipped, as are lines without an `id`; the first
/// record for each id wins. Returns the number of lines written.
pub fn collect_shards(indir: &Path, outfile: &Path) -> Result<usize> {
    if !indir.is_dir() {
        return Err(EvalError::Dataset(format!(
            "shard directory '{}' does not exist",
            indir.display()
        )));
    }

    let mut shards: Vec<PathBuf> = WalkDir::new(indir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|p| {
            p.is_file()
                && matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("json") | Some("jsonl")
                )
        })
        .collect();
    shards.sort();

    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for shard in &shards {
        let content = fs::read_to_string(shard).map_err(|e| EvalError::io(shard, e))?;
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                tracing::debug!(shard = %shard.display(), "skipping malformed line");
                continue;
            };
            let Some(id) = value.get("id").map(id_key) else {
                tracing::debug!(shard = %shard.display(), "skipping line without id");
                continue;
            };
            if seen.insert(id) {
                merged.push(value);
            }
        }
    }

    let mut buf = Vec::new();
    for value in &merged {
        writeln!(buf, "{}", value).map_err(|e| EvalError::io(outfile, e))?;
    }
    write_atomic(outfile, &buf)?;

    tracing::info!(shards = shards.len(), records = merged.len(), "merged shards");
    Ok(merged.len())
}

fn id_key(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::valid_output;
    use tempfile::TempDir;

    fn record(id: &str, blocked: bool) -> InferenceRecord {
        let input = Example::new(id).with_field("rhr", 60).with_field("journal_text", "ok");
        let parsed = if blocked {
            Err(crate::schema::ValidationError::single("$", "bad"))
        } else {
            Ok(valid_output())
        };
        InferenceRecord::new("mut_v1", input, "raw text".to_string(), parsed)
    }

    #[test]
    fn test_inference_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/infer/mut_v1.jsonl");
        let records = vec![record("ex1", false), record("ex2", true)];

        write_jsonl(&path, &records).unwrap();
        let loaded = load_inference(&path).unwrap();

        assert_eq!(loaded, records);
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn test_blocked_record_has_canonical_empty_parsed() {
        let rec = record("ex2", true);
        assert!(rec.blocked);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(
            json["parsed"],
            serde_json::json!({"summary": "", "suggestions": [], "disclaimer": ""})
        );
    }

    #[test]
    fn test_null_parsed_reads_as_empty() {
        let line = r#"{"id":"a","tag":"t","input":{"id":"a"},"raw":"x","parsed":null,"blocked":true}"#;
        let rec: InferenceRecord = serde_json::from_str(line).unwrap();
        assert!(rec.parsed.is_empty());
    }

    #[test]
    fn test_judged_record_uses_final_key() {
        let rec = JudgedRecord {
            id: "a".into(),
            tag: "t".into(),
            blocked: false,
            dim_scores: IndexMap::from([("safety".to_string(), 4.0)]),
            final_score: 4.0,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["final"], 4.0);
    }

    #[test]
    fn test_write_csv_with_absent_cells() {
        #[derive(Serialize)]
        struct Row {
            id: String,
            score: Option<f64>,
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.csv");
        let rows = vec![
            Row { id: "a".into(), score: Some(0.5) },
            Row { id: "b".into(), score: None },
        ];
        write_csv(&path, &rows, &["id", "score"]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "id,score\na,0.5\nb,\n");
    }

    #[test]
    fn test_collect_shards_dedupes_and_skips_garbage() {
        let dir = TempDir::new().unwrap();
        let shards = dir.path().join("shards");
        fs::create_dir_all(&shards).unwrap();
        fs::write(
            shards.join("shard-00001.jsonl"),
            "{\"id\":\"b\",\"v\":1}\n\nnot json\n{\"id\":\"a\",\"v\":1}\n",
        )
        .unwrap();
        fs::write(
            shards.join("shard-00000.json"),
            "{\"id\":\"b\",\"v\":0}\n{\"v\":9}\n",
        )
        .unwrap();
        fs::write(shards.join("notes.txt"), "{\"id\":\"z\"}\n").unwrap();

        let out = dir.path().join("merged/all.jsonl");
        let n = collect_shards(&shards, &out).unwrap();
        assert_eq!(n, 2);

        let merged: Vec<serde_json::Value> = read_jsonl(&out).unwrap();
        assert_eq!(merged[0]["id"], "b");
        assert_eq!(merged[0]["v"], 0);
        assert_eq!(merged[1]["id"], "a");
    }

    #[test]
    fn test_spaced_json_layout() {
        let empty = to_spaced_json(&WellnessOutput::empty()).unwrap();
        assert_eq!(empty, r#"{"summary": "", "suggestions": [], "disclaimer": ""}"#);

        let value = serde_json::json!({"a": [1, 2], "b": "caf\u{e9} \u{1F600}\n"});
        assert_eq!(
            to_spaced_json(&value).unwrap(),
            r#"{"a": [1, 2], "b": "caf\u00e9 \ud83d\ude00\n"}"#
        );
    }

    #[test]
    fn test_clear_shards_only_touches_worker_shards() {
        let dir = TempDir::new().unwrap();
        fs::write(shard_path(dir.path(), 0), "{\"id\":\"a\"}\n").unwrap();
        fs::write(shard_path(dir.path(), 3), "{\"id\":\"b\"}\n").unwrap();
        fs::write(dir.path().join("merged.jsonl"), "{\"id\":\"c\"}\n").unwrap();

        assert_eq!(clear_shards(dir.path()).unwrap(), 2);
        assert!(!shard_path(dir.path(), 0).exists());
        assert!(dir.path().join("merged.jsonl").exists());
        assert_eq!(clear_shards(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_collect_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(collect_shards(&dir.path().join("nope"), &dir.path().join("o.jsonl")).is_err());
    }
}
