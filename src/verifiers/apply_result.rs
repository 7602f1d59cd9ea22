//! Apply-result record verification (`AR*` rules).
//!
//! The apply executor reports what happened when a verified patch set was
//! applied (or dry-run) against a target root. The cross-field rules here
//! are the interesting ones: summary totals must equal the aggregated
//! per-operation statuses, and an error message is required exactly when
//! something actually failed.

use crate::core::canonical::canonical_round_trip_ok;
use crate::core::paths::{is_safe_relative_path, is_sorted, unsafe_path_reason};
use crate::core::report::{
    Finding, Rule, SCHEMA_RULE, Verdict, json_type_name, run_checklist, top_level_gate,
};
use crate::core::shape::{
    bool_field, get_arr, get_obj, get_str, get_u64, obj_field, object_elements, opt_obj_field,
    opt_str_field, str_field, string_array_field, string_vec, u64_field,
};
use crate::verifiers::{is_sha256_ref, project_without, seal};
use serde_json::{Map, Value};

pub const OUTCOMES: &[&str] = &["SUCCESS", "FAILED", "REFUSED"];
pub const OPERATION_STATUSES: &[&str] = &["success", "skipped", "error"];
pub const OPERATION_OPS: &[&str] = &["create", "modify", "delete"];

const EPHEMERAL_KEYS: &[&str] = &["ephemeral"];

const REQUIRED_TOP_LEVEL: &[&str] = &[
    "schema_version",
    "outcome",
    "dry_run",
    "target_root",
    "operation_results",
    "summary",
];

type Doc = Map<String, Value>;

const RULES: &[Rule<Doc, ()>] = &[
    (SCHEMA_RULE, check_shape),
    ("AR1", check_outcome),
    ("AR2", check_target_root),
    ("AR3", check_operations),
    ("AR4", check_hash_refs),
    ("AR5", check_summary),
    ("AR6", check_violations_sorted),
    ("AR7", check_error_presence),
    ("AR8", check_round_trip),
];

/// Everything except `ephemeral`.
pub fn to_core(doc: &Doc) -> Value {
    project_without(doc, EPHEMERAL_KEYS)
}

/// Verify an apply-result record.
pub fn verify(input: &Value) -> Verdict {
    let doc = match top_level_gate(input, REQUIRED_TOP_LEVEL) {
        Ok(doc) => doc,
        Err(violations) => return Verdict::invalid(violations),
    };
    let violations = run_checklist(doc, &(), RULES);
    seal(to_core(doc), violations, "AR8")
}

fn results(doc: &Doc) -> impl Iterator<Item = (usize, &Map<String, Value>)> {
    get_arr(doc, "operation_results")
        .into_iter()
        .flat_map(object_elements)
}

fn check_shape(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let mut out = Vec::new();
    str_field(doc, "schema_version", "", &mut out);
    str_field(doc, "outcome", "", &mut out);
    bool_field(doc, "dry_run", "", &mut out);
    str_field(doc, "target_root", "", &mut out);

    match doc.get("operation_results") {
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let at = format!("operation_results[{}]", i);
                let Some(op) = item.as_object() else {
                    out.push((
                        Some(at),
                        format!("expected object, found {}", json_type_name(item)),
                    ));
                    continue;
                };
                str_field(op, "op", &at, &mut out);
                str_field(op, "path", &at, &mut out);
                str_field(op, "status", &at, &mut out);
                for key in ["before_hash", "after_hash"] {
                    match op.get(key) {
                        None => out.push((
                            Some(format!("{}.{}", at, key)),
                            format!("missing required field `{}.{}`", at, key),
                        )),
                        Some(Value::Null) | Some(Value::String(_)) => {}
                        Some(other) => out.push((
                            Some(format!("{}.{}", at, key)),
                            format!("expected string or null, found {}", json_type_name(other)),
                        )),
                    }
                }
            }
        }
        Some(other) => out.push((
            Some("operation_results".to_string()),
            format!("expected array, found {}", json_type_name(other)),
        )),
        None => {}
    }

    if let Some(summary) = obj_field(doc, "summary", "", &mut out) {
        u64_field(summary, "total", "summary", &mut out);
        u64_field(summary, "succeeded", "summary", &mut out);
        u64_field(summary, "skipped", "summary", &mut out);
        u64_field(summary, "errors", "summary", &mut out);
    }

    if doc.contains_key("violations") {
        string_array_field(doc, "violations", "", &mut out);
    }
    opt_str_field(doc, "error", "", &mut out);
    if doc.contains_key("ephemeral") {
        opt_obj_field(doc, "ephemeral", "", &mut out);
    }
    out
}

fn check_outcome(doc: &Doc, _opts: &()) -> Vec<Finding> {
    match get_str(doc, "outcome") {
        Some(outcome) if !OUTCOMES.contains(&outcome) => vec![(
            Some("outcome".to_string()),
            format!("unknown outcome `{}`, expected one of {:?}", outcome, OUTCOMES),
        )],
        _ => Vec::new(),
    }
}

fn check_target_root(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let Some(root) = get_str(doc, "target_root") else {
        return Vec::new();
    };
    // `.` means "apply in place" and is the one non-segment path allowed.
    if root == "." || is_safe_relative_path(root) {
        Vec::new()
    } else {
        let reason = unsafe_path_reason(root).unwrap_or("path is not relative");
        vec![(
            Some("target_root".to_string()),
            format!("`{}`: {}", root, reason),
        )]
    }
}

fn check_operations(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let mut out = Vec::new();
    for (i, op) in results(doc) {
        if let Some(kind) = get_str(op, "op") {
            if !OPERATION_OPS.contains(&kind) {
                out.push((
                    Some(format!("operation_results[{}].op", i)),
                    format!("unknown op `{}`, expected one of {:?}", kind, OPERATION_OPS),
                ));
            }
        }
        if let Some(status) = get_str(op, "status") {
            if !OPERATION_STATUSES.contains(&status) {
                out.push((
                    Some(format!("operation_results[{}].status", i)),
                    format!(
                        "unknown status `{}`, expected one of {:?}",
                        status, OPERATION_STATUSES
                    ),
                ));
            }
        }
        if let Some(path) = get_str(op, "path") {
            if let Some(reason) = unsafe_path_reason(path) {
                out.push((
                    Some(format!("operation_results[{}].path", i)),
                    format!("`{}`: {}", path, reason),
                ));
            }
        }
    }
    out
}

fn check_hash_refs(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let mut out = Vec::new();
    for (i, op) in results(doc) {
        for key in ["before_hash", "after_hash"] {
            if let Some(Value::String(hash)) = op.get(key) {
                if !is_sha256_ref(hash) {
                    out.push((
                        Some(format!("operation_results[{}].{}", i, key)),
                        format!("`{}` is not null or a sha256:<64 lowercase hex> reference", hash),
                    ));
                }
            }
        }
    }
    out
}

fn check_summary(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(summary) = get_obj(doc, "summary") else {
        return out;
    };
    let mut total = 0u64;
    let mut succeeded = 0u64;
    let mut skipped = 0u64;
    let mut errors = 0u64;
    for (_, op) in results(doc) {
        total += 1;
        match get_str(op, "status") {
            Some("success") => succeeded += 1,
            Some("skipped") => skipped += 1,
            Some("error") => errors += 1,
            _ => {}
        }
    }
    let expected = [
        ("total", total),
        ("succeeded", succeeded),
        ("skipped", skipped),
        ("errors", errors),
    ];
    for (key, want) in expected {
        if let Some(got) = get_u64(summary, key) {
            if got != want {
                out.push((
                    Some(format!("summary.{}", key)),
                    format!("declared {} but operations aggregate to {}", got, want),
                ));
            }
        }
    }
    out
}

fn check_violations_sorted(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let Some(violations) = string_vec(doc, "violations") else {
        return Vec::new();
    };
    if is_sorted(&violations) {
        Vec::new()
    } else {
        vec![(
            Some("violations".to_string()),
            "violations is not sorted".to_string(),
        )]
    }
}

fn check_error_presence(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let outcome = get_str(doc, "outcome");
    let any_error = results(doc).any(|(_, op)| get_str(op, "status") == Some("error"));
    let needs_error = matches!(outcome, Some("FAILED") | Some("REFUSED")) || any_error;
    let error = get_str(doc, "error");

    match (needs_error, error) {
        (true, None) => vec![(
            Some("error".to_string()),
            "error message is required for FAILED/REFUSED outcomes or error operations".to_string(),
        )],
        (true, Some(e)) if e.trim().is_empty() => vec![(
            Some("error".to_string()),
            "error message must be non-empty".to_string(),
        )],
        (false, Some(_)) => vec![(
            Some("error".to_string()),
            "error message is only allowed when something failed".to_string(),
        )],
        _ => Vec::new(),
    }
}

fn check_round_trip(doc: &Doc, _opts: &()) -> Vec<Finding> {
    if canonical_round_trip_ok(&Value::Object(doc.clone())) {
        Vec::new()
    } else {
        vec![(
            None,
            "record does not survive canonical parse/re-encode".to_string(),
        )]
    }
}
