//! Repository-state record verification (`RS*` rules).
//!
//! A repo-state record pins the exact repository configuration a run was
//! produced against: commit, lockfile hash, dirty paths, and the versions
//! of the seven schema contracts in force. The core projection excludes
//! `ephemeral` so the same repository state hashes identically no matter
//! when or where it was captured.

use crate::core::canonical::canonical_round_trip_ok;
use crate::core::paths::{is_sorted, is_sorted_strict, unsafe_path_reason};
use crate::core::report::{
    Finding, Rule, SCHEMA_RULE, Verdict, json_type_name, run_checklist, top_level_gate,
};
use crate::core::shape::{get_obj, get_str, obj_field, opt_obj_field, str_field, string_array_field, string_vec};
use crate::verifiers::{is_semver, is_sha256_ref, project_without, seal};
use regex::Regex;
use serde_json::{Map, Value};

/// The seven schema contracts every repo-state record must pin, in sorted
/// key order.
pub const REQUIRED_CONTRACT_KEYS: &[&str] = &[
    "apply_result",
    "bundle",
    "patch_set",
    "policy",
    "proposal",
    "repo_state",
    "runner",
];

const EPHEMERAL_KEYS: &[&str] = &["ephemeral"];

const REQUIRED_TOP_LEVEL: &[&str] = &[
    "schema_version",
    "repo_commit",
    "package_lock_sha256",
    "dirty_paths",
    "contracts",
];

type Doc = Map<String, Value>;

const RULES: &[Rule<Doc, ()>] = &[
    (SCHEMA_RULE, check_shape),
    ("RS1", check_schema_version),
    ("RS2", check_repo_commit),
    ("RS3", check_package_lock),
    ("RS4", check_dirty_paths),
    ("RS5", check_contracts),
    ("RS6", check_round_trip),
];

/// Everything except `ephemeral`.
pub fn to_core(doc: &Doc) -> Value {
    project_without(doc, EPHEMERAL_KEYS)
}

/// Verify a repository-state record.
pub fn verify(input: &Value) -> Verdict {
    let doc = match top_level_gate(input, REQUIRED_TOP_LEVEL) {
        Ok(doc) => doc,
        Err(violations) => return Verdict::invalid(violations),
    };
    let violations = run_checklist(doc, &(), RULES);
    seal(to_core(doc), violations, "RS6")
}

fn check_shape(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let mut out = Vec::new();
    str_field(doc, "schema_version", "", &mut out);
    str_field(doc, "repo_commit", "", &mut out);
    str_field(doc, "package_lock_sha256", "", &mut out);
    string_array_field(doc, "dirty_paths", "", &mut out);
    if let Some(contracts) = obj_field(doc, "contracts", "", &mut out) {
        for (key, value) in contracts {
            if !value.is_string() {
                out.push((
                    Some(format!("contracts.{}", key)),
                    format!("expected string, found {}", json_type_name(value)),
                ));
            }
        }
    }
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

fn check_repo_commit(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let Some(commit) = get_str(doc, "repo_commit") else {
        return Vec::new();
    };
    let re = Regex::new(r"^[0-9a-f]{40}$").expect("commit pattern is valid");
    if re.is_match(commit) {
        Vec::new()
    } else {
        vec![(
            Some("repo_commit".to_string()),
            format!("`{}` is not a 40-char lower-case hex commit", commit),
        )]
    }
}

fn check_package_lock(doc: &Doc, _opts: &()) -> Vec<Finding> {
    match get_str(doc, "package_lock_sha256") {
        Some(h) if !is_sha256_ref(h) => vec![(
            Some("package_lock_sha256".to_string()),
            format!("`{}` is not a sha256:<64 lowercase hex> reference", h),
        )],
        _ => Vec::new(),
    }
}

fn check_dirty_paths(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(paths) = string_vec(doc, "dirty_paths") else {
        return out;
    };
    if !is_sorted_strict(&paths) {
        out.push((
            Some("dirty_paths".to_string()),
            "dirty_paths is not strictly sorted".to_string(),
        ));
    }
    for (i, path) in paths.iter().enumerate() {
        if let Some(reason) = unsafe_path_reason(path) {
            out.push((
                Some(format!("dirty_paths[{}]", i)),
                format!("`{}`: {}", path, reason),
            ));
        }
    }
    out
}

fn check_contracts(doc: &Doc, _opts: &()) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(contracts) = get_obj(doc, "contracts") else {
        return out;
    };
    for key in REQUIRED_CONTRACT_KEYS {
        match contracts.get(*key) {
            None => out.push((
                Some(format!("contracts.{}", key)),
                format!("missing required contract `{}`", key),
            )),
            Some(Value::String(s)) if s.is_empty() => out.push((
                Some(format!("contracts.{}", key)),
                format!("contract `{}` must be non-empty", key),
            )),
            _ => {}
        }
    }
    for key in contracts.keys() {
        if !REQUIRED_CONTRACT_KEYS.contains(&key.as_str()) {
            out.push((
                Some(format!("contracts.{}", key)),
                format!("unknown contract `{}`", key),
            ));
        }
    }
    // serde_json object keys come back in insertion order; stored order
    // must already be sorted.
    let keys: Vec<&str> = contracts.keys().map(String::as_str).collect();
    if !is_sorted(&keys) {
        out.push((
            Some("contracts".to_string()),
            "contract keys are not stored in sorted order".to_string(),
        ));
    }
    out
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
