//! Internal proposal verification (`PR*` rules).
//!
//! A proposal is the planning-side artifact a patch set traces back to:
//! what the agent intends to touch, at what risk, and whether a human (or
//! policy gate) approved it. The core projection excludes `ephemeral` so
//! re-derived proposals content-address identically.

use crate::core::canonical::canonical_round_trip_ok;
use crate::core::paths::{is_sorted_strict, unsafe_path_reason};
use crate::core::report::{
    Finding, Rule, SCHEMA_RULE, Verdict, run_checklist, top_level_gate,
};
use crate::core::shape::{
    get_str, opt_obj_field, opt_str_field, str_field, string_array_field, string_vec,
};
use crate::verifiers::{is_semver, is_sha256_ref, project_without, seal};
use regex::Regex;
use serde_json::{Map, Value};

pub const PROPOSAL_KINDS: &[&str] = &["feature", "fix", "refactor", "chore"];
pub const RISK_LEVELS: &[&str] = &["low", "medium", "high"];
pub const PROPOSAL_STATUSES: &[&str] = &["draft", "approved", "rejected", "superseded"];

const EPHEMERAL_KEYS: &[&str] = &["ephemeral"];

const REQUIRED_TOP_LEVEL: &[&str] = &[
    "schema_version",
    "proposal_id",
    "kind",
    "summary",
    "target_paths",
    "risk",
    "status",
];

type Doc = Map<String, Value>;

const RULES: &[Rule<Doc, ()>] = &[
    (SCHEMA_RULE, check_shape),
    ("PR1", check_schema_version),
    ("PR2", check_proposal_id),
    ("PR3", check_kind),
    ("PR4", check_risk),
    ("PR5", check_status),
    ("PR6", check_target_paths),
    ("PR7", check_bundle_hash),
    ("PR8", check_summary),
    ("PR9", check_approval),
    ("PR10", check_round_trip),
];

/// Everything except `ephemeral`.
pub fn to_core(doc: &Doc) -> Value {
    project_without(doc, EPHEMERAL_KEYS)
}

/// Verify an internal proposal.
pub fn verify(input: &Value) -> Verdict {
    let doc = match top_level_gate(input, REQUIRED_TOP_LEVEL) {
        Ok(doc) => doc,
        Err(violations) => return Verdict::invalid(violations),
    };
    let violations = run_checklist(doc, &(), RULES);
    seal(to_core(doc), violations, "PR10")
}

fn check_shape(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let mut out = Vec::new();
    str_field(doc, "schema_version", "", &mut out);
    str_field(doc, "proposal_id", "", &mut out);
    str_field(doc, "kind", "", &mut out);
    str_field(doc, "summary", "", &mut out);
    string_array_field(doc, "target_paths", "", &mut out);
    str_field(doc, "risk", "", &mut out);
    str_field(doc, "status", "", &mut out);
    opt_str_field(doc, "bundle_hash", "", &mut out);
    opt_str_field(doc, "approved_by", "", &mut out);
    if doc.contains_key("ephemeral") {
        opt_obj_field(doc, "ephemeral", "", &mut out);
    }
    out
}

fn check_schema_version(doc: &Doc, _opts: &()) -> Vec<Finding> {
    match get_str(doc, "schema_version") {
        Some(v) if !is_semver(v) => vec![(
            Some("schema_version".to_string()),
            format!("`{}` is not a MAJOR.MINOR.PATCH version", v),
        )],
        _ => Vec::new(),
    }
}

fn check_proposal_id(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let Some(id) = get_str(doc, "proposal_id") else {
        return Vec::new();
    };
    let re = Regex::new(r"^prop_[0-9]{8}_[a-z0-9]{6}$").expect("proposal id pattern is valid");
    if re.is_match(id) {
        Vec::new()
    } else {
        vec![(
            Some("proposal_id".to_string()),
            format!("proposal_id `{}` does not match prop_{{8digits}}_{{6alnum}}", id),
        )]
    }
}

fn enum_finding(doc: &Doc, key: &str, allowed: &[&str]) -> Vec<Finding> {
    match get_str(doc, key) {
        Some(v) if !allowed.contains(&v) => vec![(
            Some(key.to_string()),
            format!("unknown {} `{}`, expected one of {:?}", key, v, allowed),
        )],
        _ => Vec::new(),
    }
}

fn check_kind(doc: &Doc, _opts: &()) -> Vec<Finding> {
    enum_finding(doc, "kind", PROPOSAL_KINDS)
}

fn check_risk(doc: &Doc, _opts: &()) -> Vec<Finding> {
    enum_finding(doc, "risk", RISK_LEVELS)
}

fn check_status(doc: &Doc, _opts: &()) -> Vec<Finding> {
    enum_finding(doc, "status", PROPOSAL_STATUSES)
}

fn check_target_paths(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(paths) = string_vec(doc, "target_paths") else {
        return out;
    };
    if paths.is_empty() {
        out.push((
            Some("target_paths".to_string()),
            "target_paths must name at least one path".to_string(),
        ));
    }
    if !is_sorted_strict(&paths) {
        out.push((
            Some("target_paths".to_string()),
            "target_paths is not strictly sorted".to_string(),
        ));
    }
    for (i, path) in paths.iter().enumerate() {
        if let Some(reason) = unsafe_path_reason(path) {
            out.push((
                Some(format!("target_paths[{}]", i)),
                format!("`{}`: {}", path, reason),
            ));
        }
    }
    out
}

fn check_bundle_hash(doc: &Doc, _opts: &()) -> Vec<Finding> {
    match get_str(doc, "bundle_hash") {
        Some(h) if !is_sha256_ref(h) => vec![(
            Some("bundle_hash".to_string()),
            format!("`{}` is not a sha256:<64 lowercase hex> reference", h),
        )],
        _ => Vec::new(),
    }
}

fn check_summary(doc: &Doc, _opts: &()) -> Vec<Finding> {
    match get_str(doc, "summary") {
        Some(s) if s.trim().is_empty() => vec![(
            Some("summary".to_string()),
            "summary must be non-blank".to_string(),
        )],
        _ => Vec::new(),
    }
}

fn check_approval(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let approved = get_str(doc, "status") == Some("approved");
    let approver = get_str(doc, "approved_by");
    match (approved, approver) {
        (true, None) => vec![(
            Some("approved_by".to_string()),
            "approved proposals must name an approver".to_string(),
        )],
        (true, Some(a)) if a.trim().is_empty() => vec![(
            Some("approved_by".to_string()),
            "approver must be non-empty".to_string(),
        )],
        (false, Some(_)) => vec![(
            Some("approved_by".to_string()),
            "approved_by is only allowed on approved proposals".to_string(),
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
