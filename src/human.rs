//! Human evaluation: blinded pairs, annotation log, analysis.
//!
//! Pairs show the two systems' outputs for one example as "A" and "B" in
//! random order; the answer key records which system is which. Annotations
//! are appended to a CSV log and later resolved through the key.

use crate::error::{EvalError, Result};
use crate::store::{self, InferenceRecord};
use indexmap::IndexMap;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::str::FromStr;

/// Likert dimensions rated by annotators, in CSV order.
pub const LIKERT_DIMENSIONS: [&str; 4] = ["helpful", "factual", "safety", "clarity"];

/// Annotation CSV header.
pub const ANNOTATION_HEADER: [&str; 10] = [
    "ts", "annotator", "id", "pref", "helpful", "factual", "safety", "clarity", "tags", "notes",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemText {
    pub text: String,
}

/// Which system sits behind each blinded slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerKey {
    #[serde(rename = "A_is")]
    pub a_is: String,
    #[serde(rename = "B_is")]
    pub b_is: String,
}

/// One blinded comparison task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairTask {
    pub id: String,
    #[serde(rename = "systemA")]
    pub system_a: SystemText,
    #[serde(rename = "systemB")]
    pub system_b: SystemText,
    pub answer_key: AnswerKey,
}

/// Build pairs for ids present in both stores, sorted by id.
///
/// Each pair's order is shuffled independently; the answer key names each
/// side by its record's tag, so a shared id whose two records carry the same
/// tag is an error.
pub fn prepare_pairs<R: Rng + ?Sized>(
    mut_records: Vec<InferenceRecord>,
    baseline_records: Vec<InferenceRecord>,
    rng: &mut R,
) -> Result<Vec<PairTask>> {
    let mut_by_id = store::index_by_id(mut_records);
    let base_by_id = store::index_by_id(baseline_records);

    let ids: BTreeSet<&String> = mut_by_id
        .keys()
        .filter(|id| base_by_id.contains_key(*id))
        .collect();

    let mut pairs = Vec::with_capacity(ids.len());
    for id in ids {
        let (Some(m), Some(b)) = (mut_by_id.get(id), base_by_id.get(id)) else {
            continue;
        };
        if m.tag == b.tag {
            return Err(EvalError::Dataset(format!(
                "both stores tag '{}' as '{}'; pairs need distinct system tags",
                id, m.tag
            )));
        }
        let mut sides = [
            (m.parsed.flatten(), m.tag.clone()),
            (b.parsed.flatten(), b.tag.clone()),
        ];
        sides.shuffle(rng);
        let [(a_text, a_is), (b_text, b_is)] = sides;
        pairs.push(PairTask {
            id: id.clone(),
            system_a: SystemText { text: a_text },
            system_b: SystemText { text: b_text },
            answer_key: AnswerKey { a_is, b_is },
        });
    }
    Ok(pairs)
}

/// Pairwise preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Preference {
    A,
    B,
    Tie,
}

impl FromStr for Preference {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "A" | "a" => Ok(Preference::A),
            "B" | "b" => Ok(Preference::B),
            t if t.eq_ignore_ascii_case("tie") => Ok(Preference::Tie),
            other => Err(EvalError::Dataset(format!(
                "preference must be A, B or Tie, got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preference::A => write!(f, "A"),
            Preference::B => write!(f, "B"),
            Preference::Tie => write!(f, "Tie"),
        }
    }
}

/// One annotator judgment before it is logged.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub annotator: String,
    pub id: String,
    pub pref: Preference,
    pub helpful: u8,
    pub factual: u8,
    pub safety: u8,
    pub clarity: u8,
    pub tags: Vec<String>,
    pub notes: String,
}

impl Annotation {
    /// Ratings must be within 1..=5 and the item id non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EvalError::Dataset("annotation needs an item id".into()));
        }
        for (name, value) in LIKERT_DIMENSIONS.iter().zip(self.ratings()) {
            if !(1..=5).contains(&value) {
                return Err(EvalError::Dataset(format!(
                    "rating '{}' must be between 1 and 5, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    fn ratings(&self) -> [u8; 4] {
        [self.helpful, self.factual, self.safety, self.clarity]
    }

    pub fn to_row(&self, ts: i64) -> AnnotationRow {
        AnnotationRow {
            ts,
            annotator: self.annotator.clone(),
            id: self.id.clone(),
            pref: self.pref,
            helpful: self.helpful,
            factual: self.factual,
            safety: self.safety,
            clarity: self.clarity,
            tags: self.tags.join("|"),
            notes: self.notes.clone(),
        }
    }
}

/// One line of the annotation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRow {
    /// Unix seconds.
    pub ts: i64,
    pub annotator: String,
    pub id: String,
    pub pref: Preference,
    pub helpful: u8,
    pub factual: u8,
    pub safety: u8,
    pub clarity: u8,
    /// `|`-joined error tags.
    pub tags: String,
    pub notes: String,
}

impl AnnotationRow {
    fn rating(&self, dimension: &str) -> Option<u8> {
        match dimension {
            "helpful" => Some(self.helpful),
            "factual" => Some(self.factual),
            "safety" => Some(self.safety),
            "clarity" => Some(self.clarity),
            _ => None,
        }
    }
}

/// Validate and append one annotation, stamped with the current time.
///
/// The header is written only when the log is new or empty.
pub fn append_annotation(path: &Path, annotation: &Annotation) -> Result<()> {
    annotation.validate()?;
    let row = annotation.to_row(chrono::Utc::now().timestamp());

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| EvalError::io(path, e))?;
    let is_empty = file.metadata().map_err(|e| EvalError::io(path, e))?.len() == 0;

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    if is_empty {
        writer.write_record(ANNOTATION_HEADER)?;
    }
    writer.serialize(&row)?;
    writer.flush().map_err(|e| EvalError::io(path, e))?;

    tracing::debug!(id = %row.id, annotator = %row.annotator, "annotation recorded");
    Ok(())
}

pub fn load_annotations(path: &Path) -> Result<Vec<AnnotationRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    reader
        .deserialize()
        .map(|row| row.map_err(EvalError::from))
        .collect()
}

/// Mean and population standard deviation of one Likert dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionStats {
    pub mean: f64,
    pub sd: f64,
}

/// Preferences resolved through the answer key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WinSummary {
    pub wins: BTreeMap<String, usize>,
    pub ties: usize,
    /// Annotations whose id has no pair.
    pub unmatched: usize,
}

impl WinSummary {
    /// Share of decisive judgments won by `system` (ties excluded).
    pub fn win_rate(&self, system: &str) -> Option<f64> {
        let decisive: usize = self.wins.values().sum();
        (decisive > 0).then(|| self.wins.get(system).copied().unwrap_or(0) as f64 / decisive as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationReport {
    pub prefs: BTreeMap<Preference, usize>,
    /// Empty when there are no annotations.
    pub dimensions: IndexMap<String, DimensionStats>,
    pub n_annotations: usize,
    pub n_items: usize,
    pub wins: Option<WinSummary>,
}

/// Summarize annotations, resolving wins when `pairs` are given.
pub fn analyze(rows: &[AnnotationRow], pairs: Option<&[PairTask]>) -> AnnotationReport {
    let mut prefs = BTreeMap::new();
    for row in rows {
        *prefs.entry(row.pref).or_insert(0) += 1;
    }

    let dimensions = if rows.is_empty() {
        IndexMap::new()
    } else {
        LIKERT_DIMENSIONS
            .iter()
            .map(|dim| {
                let values: Vec<f64> = rows
                    .iter()
                    .filter_map(|r| r.rating(dim))
                    .map(f64::from)
                    .collect();
                (dim.to_string(), stats(&values))
            })
            .collect()
    };

    let n_items = rows.iter().map(|r| r.id.as_str()).collect::<BTreeSet<_>>().len();
    let wins = pairs.map(|pairs| resolve_wins(rows, pairs));

    AnnotationReport {
        prefs,
        dimensions,
        n_annotations: rows.len(),
        n_items,
        wins,
    }
}

fn stats(values: &[f64]) -> DimensionStats {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    DimensionStats {
        mean,
        sd: var.sqrt(),
    }
}

fn resolve_wins(rows: &[AnnotationRow], pairs: &[PairTask]) -> WinSummary {
    let keys: HashMap<&str, &AnswerKey> = pairs
        .iter()
        .map(|p| (p.id.as_str(), &p.answer_key))
        .collect();

    let mut summary = WinSummary::default();
    for row in rows {
        let Some(key) = keys.get(row.id.as_str()) else {
            summary.unmatched += 1;
            continue;
        };
        let winner = match row.pref {
            Preference::A => &key.a_is,
            Preference::B => &key.b_is,
            Preference::Tie => {
                summary.ties += 1;
                continue;
            }
        };
        *summary.wins.entry(winner.clone()).or_insert(0) += 1;
    }
    summary
}

impl fmt::Display for AnnotationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefs: Vec<String> = self
            .prefs
            .iter()
            .map(|(p, n)| format!("{}: {}", p, n))
            .collect();
        writeln!(f, "Pairwise: {{{}}}", prefs.join(", "))?;

        for (dim, s) in &self.dimensions {
            writeln!(f, "{}: mean={:.2}, sd={:.2}", dim, s.mean, s.sd)?;
        }
        write!(
            f,
            "N annotations: {}; N items: {}",
            self.n_annotations, self.n_items
        )?;

        if let Some(wins) = &self.wins {
            for (system, n) in &wins.wins {
                let rate = wins.win_rate(system).unwrap_or(0.0);
                write!(f, "\n{}: {} wins (win rate {:.1}%)", system, n, rate * 100.0)?;
            }
            write!(f, "\nTies: {}", wins.ties)?;
            if wins.unmatched > 0 {
                write!(f, "; unmatched: {}", wins.unmatched)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Example;
    use crate::schema::ValidationError;
    use crate::testing::valid_output;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::TempDir;

    fn rec(id: &str, tag: &str, ok: bool) -> InferenceRecord {
        let parsed = if ok {
            Ok(valid_output())
        } else {
            Err(ValidationError::single("$", "bad"))
        };
        InferenceRecord::new(tag, Example::new(id), "raw".into(), parsed)
    }

    fn annotation(id: &str, pref: Preference) -> Annotation {
        Annotation {
            annotator: "ann1".into(),
            id: id.into(),
            pref,
            helpful: 4,
            factual: 5,
            safety: 5,
            clarity: 3,
            tags: vec!["Off-topic".into(), "Other".into()],
            notes: "fine, mostly".into(),
        }
    }

    fn row(id: &str, pref: Preference, helpful: u8) -> AnnotationRow {
        let mut a = annotation(id, pref);
        a.helpful = helpful;
        a.to_row(0)
    }

    #[test]
    fn test_prepare_pairs_intersection_and_key() {
        let mut_recs = vec![rec("b", "mut_v1", true), rec("a", "mut_v1", true), rec("z", "mut_v1", true)];
        let base_recs = vec![rec("a", "baseline_v2", false), rec("b", "baseline_v2", false)];

        let pairs = prepare_pairs(mut_recs, base_recs, &mut StdRng::seed_from_u64(7)).unwrap();

        let ids: Vec<_> = pairs.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        for p in &pairs {
            let key = &p.answer_key;
            let mut systems = [key.a_is.as_str(), key.b_is.as_str()];
            systems.sort();
            assert_eq!(systems, ["baseline_v2", "mut_v1"]);

            // the mut side carries the flattened output, the blocked baseline is empty
            let (mut_text, base_text) = if key.a_is == "mut_v1" {
                (&p.system_a.text, &p.system_b.text)
            } else {
                (&p.system_b.text, &p.system_a.text)
            };
            assert_eq!(mut_text, &valid_output().flatten());
            assert!(base_text.is_empty());
        }
    }

    #[test]
    fn test_prepare_pairs_is_seedable() {
        let make = |seed| {
            prepare_pairs(
                (0..20).map(|i| rec(&format!("{:02}", i), "m", true)).collect(),
                (0..20).map(|i| rec(&format!("{:02}", i), "b", true)).collect(),
                &mut StdRng::seed_from_u64(seed),
            )
            .unwrap()
        };
        assert_eq!(make(1), make(1));
        let first_slots: BTreeSet<String> = make(1).into_iter().map(|p| p.answer_key.a_is).collect();
        assert_eq!(first_slots.len(), 2, "both orders should occur over 20 items");
    }

    #[test]
    fn test_prepare_pairs_rejects_shared_tag() {
        let err = prepare_pairs(
            vec![rec("a", "mut_v1", true)],
            vec![rec("a", "mut_v1", false)],
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap_err();
        assert!(matches!(err, EvalError::Dataset(_)));

        // no shared id, nothing to compare
        let pairs = prepare_pairs(
            vec![rec("a", "mut_v1", true)],
            vec![rec("b", "mut_v1", false)],
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap();
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_pair_serialization_keys() {
        let pairs = prepare_pairs(
            vec![rec("a", "m", true)],
            vec![rec("a", "b", true)],
            &mut StdRng::seed_from_u64(0),
        )
        .unwrap();
        let json = serde_json::to_value(&pairs[0]).unwrap();
        assert!(json["systemA"]["text"].is_string());
        assert!(json["systemB"]["text"].is_string());
        assert!(json["answer_key"]["A_is"].is_string());
        assert!(json["answer_key"]["B_is"].is_string());
    }

    #[test]
    fn test_preference_parsing() {
        assert_eq!("A".parse::<Preference>().unwrap(), Preference::A);
        assert_eq!(" tie ".parse::<Preference>().unwrap(), Preference::Tie);
        assert!("C".parse::<Preference>().is_err());
    }

    #[test]
    fn test_append_annotation_writes_header_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("human/annotations.csv");

        append_annotation(&path, &annotation("a", Preference::A)).unwrap();
        append_annotation(&path, &annotation("b", Preference::Tie)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "ts,annotator,id,pref,helpful,factual,safety,clarity,tags,notes");
        assert!(lines[1].ends_with(",ann1,a,A,4,5,5,3,Off-topic|Other,\"fine, mostly\""));

        let rows = load_annotations(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].pref, Preference::Tie);
        assert_eq!(rows[1].tags, "Off-topic|Other");
        assert!(rows[0].ts > 0);
    }

    #[test]
    fn test_append_rejects_out_of_range_rating() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("annotations.csv");
        let mut bad = annotation("a", Preference::B);
        bad.safety = 6;

        assert!(append_annotation(&path, &bad).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_analyze_counts_and_stats() {
        let rows = vec![
            row("a", Preference::A, 2),
            row("a", Preference::B, 4),
            row("b", Preference::Tie, 3),
            row("c", Preference::A, 3),
        ];

        let report = analyze(&rows, None);

        assert_eq!(report.prefs[&Preference::A], 2);
        assert_eq!(report.prefs[&Preference::B], 1);
        assert_eq!(report.prefs[&Preference::Tie], 1);
        assert_eq!(report.n_annotations, 4);
        assert_eq!(report.n_items, 3);

        let helpful = report.dimensions["helpful"];
        assert!((helpful.mean - 3.0).abs() < 1e-9);
        assert!((helpful.sd - 0.5f64.sqrt()).abs() < 1e-9);
        assert_eq!(report.dimensions["safety"].sd, 0.0);
        assert!(report.wins.is_none());

        let text = report.to_string();
        assert!(text.starts_with("Pairwise: {A: 2, B: 1, Tie: 1}"));
        assert!(text.contains("helpful: mean=3.00, sd=0.71"));
        assert!(text.contains("N annotations: 4; N items: 3"));
    }

    #[test]
    fn test_analyze_resolves_wins_through_answer_key() {
        let key = |id: &str, a: &str, b: &str| PairTask {
            id: id.into(),
            system_a: SystemText { text: String::new() },
            system_b: SystemText { text: String::new() },
            answer_key: AnswerKey { a_is: a.into(), b_is: b.into() },
        };
        let pairs = vec![key("a", "mut_v1", "baseline_v2"), key("b", "baseline_v2", "mut_v1")];
        let rows = vec![
            row("a", Preference::A, 4), // mut
            row("b", Preference::B, 4), // mut
            row("b", Preference::A, 4), // baseline
            row("a", Preference::Tie, 4),
            row("zz", Preference::A, 4),
        ];

        let wins = analyze(&rows, Some(&pairs)).wins.unwrap();
        assert_eq!(wins.wins["mut_v1"], 2);
        assert_eq!(wins.wins["baseline_v2"], 1);
        assert_eq!(wins.ties, 1);
        assert_eq!(wins.unmatched, 1);
        assert!((wins.win_rate("mut_v1").unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(WinSummary::default().win_rate("mut_v1"), None);
    }

    #[test]
    fn test_analyze_empty() {
        let report = analyze(&[], None);
        assert!(report.dimensions.is_empty());
        assert_eq!(report.n_items, 0);
    }
}
