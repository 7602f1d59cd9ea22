//! Violation records, verdicts, and the shared checklist runner.
//!
//! A violation is pure data — never a language exception. Every engine
//! returns the same shapes from here so callers can treat the seven
//! verifiers uniformly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Rule id attached to shape violations (wrong type, missing key, wrong
/// element type) across every engine.
pub const SCHEMA_RULE: &str = "SCHEMA";

/// One named, located, human-readable report of one broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn new(rule_id: &str, path: Option<String>, message: impl Into<String>) -> Self {
        Violation {
            rule_id: rule_id.to_string(),
            path,
            message: message.into(),
        }
    }

    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        Violation::new(SCHEMA_RULE, Some(path.into()), message)
    }
}

/// Result of verifying one document artifact.
///
/// `hash` is attached only when the artifact is valid; a violating record
/// is never content-addressed.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub valid: bool,
    pub violations: Vec<Violation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Verdict {
    pub fn invalid(mut violations: Vec<Violation>) -> Self {
        sort_violations(&mut violations);
        Verdict {
            valid: false,
            violations,
            hash: None,
        }
    }
}

/// The single total order every engine applies exactly once:
/// (rule_id, path-or-empty, message).
pub fn sort_violations(violations: &mut [Violation]) {
    violations.sort_by(|a, b| {
        a.rule_id
            .cmp(&b.rule_id)
            .then_with(|| a.path.as_deref().unwrap_or("").cmp(b.path.as_deref().unwrap_or("")))
            .then_with(|| a.message.cmp(&b.message))
    });
}

/// A finding produced by one rule checker: (path, message). The checklist
/// runner attaches the rule id, so a checker cannot mislabel its output.
pub type Finding = (Option<String>, String);

/// One rule: a stable id plus a local, order-independent checker over the
/// document and the engine options.
pub type Rule<D, O> = (&'static str, fn(&D, &O) -> Vec<Finding>);

/// Run every rule in the table, unconditionally, and collect violations.
///
/// Checkers only read their own slice of the document, so permuting the
/// table never changes the final set (it is sorted afterwards anyway).
pub fn run_checklist<D, O>(doc: &D, opts: &O, rules: &[Rule<D, O>]) -> Vec<Violation> {
    let mut out = Vec::new();
    for (rule_id, check) in rules {
        for (path, message) in check(doc, opts) {
            out.push(Violation::new(rule_id, path, message));
        }
    }
    out
}

/// Top-level shape gate shared by the document engines.
///
/// If the input is not a plain object or a required top-level field is
/// absent, verification stops and only these SCHEMA violations are
/// returned; running semantic rules against a shapeless value would just
/// produce noise.
pub fn top_level_gate<'a>(
    input: &'a Value,
    required: &[&str],
) -> Result<&'a Map<String, Value>, Vec<Violation>> {
    let Some(map) = input.as_object() else {
        return Err(vec![Violation::schema(
            "$",
            format!("expected object at top level, found {}", json_type_name(input)),
        )]);
    };
    let missing: Vec<Violation> = required
        .iter()
        .filter(|key| !map.contains_key(**key))
        .map(|key| Violation::schema(*key, format!("missing required field `{}`", key)))
        .collect();
    if missing.is_empty() {
        Ok(map)
    } else {
        Err(missing)
    }
}

/// Short JSON type name for violation messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorter_total_order() {
        let mut vs = vec![
            Violation::new("RN9", Some("timing".into()), "b"),
            Violation::new("RN10", Some("exit.code".into()), "a"),
            Violation::new("RN9", None, "a"),
            Violation::new("RN9", Some("timing".into()), "a"),
        ];
        sort_violations(&mut vs);
        let ids: Vec<(&str, &str, &str)> = vs
            .iter()
            .map(|v| (v.rule_id.as_str(), v.path.as_deref().unwrap_or(""), v.message.as_str()))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("RN10", "exit.code", "a"),
                ("RN9", "", "a"),
                ("RN9", "timing", "a"),
                ("RN9", "timing", "b"),
            ]
        );
    }

    #[test]
    fn gate_rejects_non_object() {
        let err = top_level_gate(&json!([1, 2]), &["id"]).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].rule_id, SCHEMA_RULE);
    }

    #[test]
    fn gate_reports_every_missing_field() {
        let err = top_level_gate(&json!({"id": "x"}), &["id", "status", "outputs"]).unwrap_err();
        let missing: Vec<&str> = err.iter().filter_map(|v| v.path.as_deref()).collect();
        assert_eq!(missing, vec!["status", "outputs"]);
    }

    #[test]
    fn checklist_attaches_rule_ids() {
        fn always(_: &u8, _: &()) -> Vec<Finding> {
            vec![(None, "boom".to_string())]
        }
        fn never(_: &u8, _: &()) -> Vec<Finding> {
            Vec::new()
        }
        let rules: &[Rule<u8, ()>] = &[("X1", always), ("X2", never)];
        let out = run_checklist(&0u8, &(), rules);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rule_id, "X1");
    }
}
