//! Fixed prompts used by the runners, the schema guard and the judge.
//!
//! Placeholders are written as `{name}` and substituted with [`fill`].

/// Collection of prompts used across the harness.
pub struct Prompts;

impl Prompts {
    /// System prompt for the models under comparison.
    pub fn coach_system() -> &'static str {
        "You are a careful wellness coach."
    }

    /// System prompt when the judge model writes reference answers.
    pub fn reference_system() -> &'static str {
        "You are an expert wellness coach."
    }

    /// System prompt for every judge call.
    pub fn judge_system() -> &'static str {
        "Return strict JSON only."
    }

    /// Rotation of judge phrasings; prompt `i` uses entry `i % len`.
    ///
    /// Placeholders: `{dims}` (comma-separated names), `{keys}` (JSON skeleton
    /// of the scores object), `{data}` (input JSON), `{out}` (model output).
    pub fn judge_rotation() -> [&'static str; 3] {
        [
            r#"You are a strict evaluator. Score each dimension 1-5: {dims}.
Return JSON: {"scores": {keys}, "notes": ""}.
DATA: {data}
OUTPUT: {out}"#,
            r#"Evaluate per rubric {dims}. Be conservative. Score each dimension 1-5.
Return JSON only: {"scores": {keys}, "notes": ""}.
DATA: {data}
OUTPUT: {out}"#,
            r#"As an expert reviewer, rate 1-5 on {dims}. JSON only (no prose), shaped as {"scores": {keys}, "notes": ""}.
DATA: {data}
OUTPUT: {out}"#,
        ]
    }

    /// Re-ask sent to the model when its output fails validation.
    ///
    /// Placeholders: `{errors}`, `{previous}`.
    pub fn guard_reask() -> &'static str {
        r#"Your previous response did not match the required JSON schema.

Errors:
{errors}

Previous response:
{previous}

Return ONLY a corrected JSON object of this shape:
{
  "summary": "<30-500 characters>",
  "suggestions": [
    {"title": "<3-80 characters>", "rationale": "<10-400 characters>", "steps": ["<3-80 characters>", "... 1 to 6 steps"]}
  ],
  "disclaimer": "<must include the words: not medical advice>"
}
Use 1 to 5 suggestions. Do not output anything else."#
    }
}

/// Substitute `{name}` placeholders in a single pass.
///
/// Unknown placeholders and literal braces are left untouched, and inserted
/// values are never rescanned.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let replaced = vars.iter().find_map(|(name, value)| {
            let key_len = name.len() + 2;
            let is_match = tail.len() >= key_len
                && tail[1..].starts_with(name)
                && tail[1 + name.len()..].starts_with('}');
            is_match.then_some((*value, key_len))
        });

        match replaced {
            Some((value, key_len)) => {
                out.push_str(value);
                rest = &tail[key_len..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_known_placeholders() {
        let s = fill("a {x} b {y} {z}", &[("x", "1"), ("y", "2")]);
        assert_eq!(s, "a 1 b 2 {z}");
    }

    #[test]
    fn test_fill_does_not_rescan_values() {
        let s = fill("{data} / {out}", &[("data", "{out}"), ("out", "X")]);
        assert_eq!(s, "{out} / X");
    }

    #[test]
    fn test_fill_keeps_json_braces() {
        let s = fill(r#"{"scores": {keys}}"#, &[("keys", r#"{"a":X}"#)]);
        assert_eq!(s, r#"{"scores": {"a":X}}"#);
    }

    #[test]
    fn test_judge_rotation_mentions_all_placeholders() {
        for p in Prompts::judge_rotation() {
            for key in ["{dims}", "{keys}", "{data}", "{out}"] {
                assert!(p.contains(key), "missing {} in {}", key, p);
            }
        }
    }
}
