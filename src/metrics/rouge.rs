//! ROUGE-L F-measure over stemmed word tokens.

use rust_stemmers::{Algorithm, Stemmer};

/// Scores candidate/reference pairs by longest common subsequence.
pub struct RougeL {
    stemmer: Stemmer,
}

impl Default for RougeL {
    fn default() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
        }
    }
}

impl RougeL {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowercase, split on anything that is not ASCII alphanumeric, stem
    /// tokens longer than three characters.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| {
                if t.len() > 3 {
                    self.stemmer.stem(t).into_owned()
                } else {
                    t.to_string()
                }
            })
            .collect()
    }

    /// F1 of LCS precision and recall; 0.0 when either side has no tokens.
    pub fn f_measure(&self, reference: &str, candidate: &str) -> f64 {
        let reference = self.tokenize(reference);
        let candidate = self.tokenize(candidate);
        if reference.is_empty() || candidate.is_empty() {
            return 0.0;
        }

        let lcs = lcs_len(&reference, &candidate) as f64;
        if lcs == 0.0 {
            return 0.0;
        }
        let precision = lcs / candidate.len() as f64;
        let recall = lcs / reference.len() as f64;
        2.0 * precision * recall / (precision + recall)
    }
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
