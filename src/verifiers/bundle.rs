//! Bundle verification (`BN*` rules).
//!
//! A bundle is the generation pipeline's output artifact: a goal tree, the
//! produced file outputs with their content hashes and provenance
//! (`source_constraints`), and whatever questions the generator could not
//! resolve. The bundle hash is what downstream run records point at, so
//! ordering invariants here are what make that hash reproducible.

use crate::core::canonical::canonical_round_trip_ok;
use crate::core::paths::{is_sorted_strict, unsafe_path_reason};
use crate::core::report::{
    Finding, Rule, SCHEMA_RULE, Verdict, json_type_name, run_checklist, top_level_gate,
};
use crate::core::shape::{
    get_arr, get_f64, get_obj, get_str, get_u64, obj_field, object_elements, str_field,
    string_array_field, string_vec, u64_field,
};
use crate::verifiers::{is_semver, is_sha256_ref, project_without, seal};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const BUNDLE_STATUSES: &[&str] = &["complete", "incomplete", "error"];

const REQUIRED_TOP_LEVEL: &[&str] = &[
    "id",
    "schema_version",
    "status",
    "root_node",
    "terminal_nodes",
    "outputs",
    "unresolved_questions",
    "stats",
];

#[derive(Debug, Clone)]
pub struct BundleOptions {
    /// Recompute each output's content hash from its content (BN5).
    pub deep_validation: bool,
}

impl Default for BundleOptions {
    fn default() -> Self {
        BundleOptions {
            deep_validation: true,
        }
    }
}

type Doc = Map<String, Value>;

const RULES: &[Rule<Doc, BundleOptions>] = &[
    (SCHEMA_RULE, check_shape),
    ("BN1", check_schema_version),
    ("BN2", check_status),
    ("BN3", check_outputs_sorted),
    ("BN4", check_output_paths),
    ("BN5", check_content_hashes),
    ("BN6", check_constraint_lists),
    ("BN7", check_confidence),
    ("BN8", check_terminal_nodes_sorted),
    ("BN9", check_question_order),
    ("BN10", check_stats),
    ("BN11", check_round_trip),
];

/// Bundles carry no ephemeral fields.
pub fn to_core(doc: &Doc) -> Value {
    project_without(doc, &[])
}

/// Verify a bundle.
pub fn verify(input: &Value, opts: &BundleOptions) -> Verdict {
    let doc = match top_level_gate(input, REQUIRED_TOP_LEVEL) {
        Ok(doc) => doc,
        Err(violations) => return Verdict::invalid(violations),
    };
    let violations = run_checklist(doc, opts, RULES);
    seal(to_core(doc), violations, "BN11")
}

fn outputs(doc: &Doc) -> impl Iterator<Item = (usize, &Map<String, Value>)> {
    get_arr(doc, "outputs").into_iter().flat_map(object_elements)
}

fn check_shape(doc: &Doc, _opts: &BundleOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    str_field(doc, "id", "", &mut out);
    str_field(doc, "schema_version", "", &mut out);
    str_field(doc, "status", "", &mut out);

    if let Some(root) = obj_field(doc, "root_node", "", &mut out) {
        str_field(root, "id", "root_node", &mut out);
        str_field(root, "goal", "root_node", &mut out);
        string_array_field(root, "constraints", "root_node", &mut out);
    }

    object_array_shape(doc, "terminal_nodes", &mut out, |node, at, out| {
        str_field(node, "id", at, out);
        string_array_field(node, "constraints", at, out);
    });

    object_array_shape(doc, "outputs", &mut out, |output, at, out| {
        str_field(output, "path", at, out);
        str_field(output, "content", at, out);
        str_field(output, "content_hash", at, out);
        string_array_field(output, "source_constraints", at, out);
        if let Some(confidence) = output.get("confidence") {
            if !confidence.is_number() {
                out.push((
                    Some(format!("{}.confidence", at)),
                    format!("expected number, found {}", json_type_name(confidence)),
                ));
            }
        } else {
            out.push((
                Some(format!("{}.confidence", at)),
                format!("missing required field `{}.confidence`", at),
            ));
        }
    });

    object_array_shape(doc, "unresolved_questions", &mut out, |q, at, out| {
        str_field(q, "id", at, out);
        u64_field(q, "priority", at, out);
        str_field(q, "category", at, out);
    });

    if let Some(stats) = obj_field(doc, "stats", "", &mut out) {
        u64_field(stats, "output_count", "stats", &mut out);
        u64_field(stats, "question_count", "stats", &mut out);
        u64_field(stats, "total_content_bytes", "stats", &mut out);
    }
    out
}

fn object_array_shape(
    doc: &Doc,
    key: &str,
    out: &mut Vec<Finding>,
    per_element: fn(&Map<String, Value>, &str, &mut Vec<Finding>),
) {
    match doc.get(key) {
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let at = format!("{}[{}]", key, i);
                match item.as_object() {
                    Some(obj) => per_element(obj, &at, out),
                    None => out.push((
                        Some(at),
                        format!("expected object, found {}", json_type_name(item)),
                    )),
                }
            }
        }
        Some(other) => out.push((
            Some(key.to_string()),
            format!("expected array, found {}", json_type_name(other)),
        )),
        None => {}
    }
}

fn check_schema_version(doc: &Doc, _opts: &BundleOptions) -> Vec<Finding> {
    match get_str(doc, "schema_version") {
        Some(v) if !is_semver(v) => vec![(
            Some("schema_version".to_string()),
            format!("`{}` is not a MAJOR.MINOR.PATCH version", v),
        )],
        _ => Vec::new(),
    }
}

fn check_status(doc: &Doc, _opts: &BundleOptions) -> Vec<Finding> {
    match get_str(doc, "status") {
        Some(status) if !BUNDLE_STATUSES.contains(&status) => vec![(
            Some("status".to_string()),
            format!(
                "unknown status `{}`, expected one of {:?}",
                status, BUNDLE_STATUSES
            ),
        )],
        _ => Vec::new(),
    }
}

fn check_outputs_sorted(doc: &Doc, _opts: &BundleOptions) -> Vec<Finding> {
    let paths: Vec<&str> = outputs(doc)
        .filter_map(|(_, o)| get_str(o, "path"))
        .collect();
    if is_sorted_strict(&paths) {
        Vec::new()
    } else {
        vec![(
            Some("outputs".to_string()),
            "outputs are not strictly sorted by path".to_string(),
        )]
    }
}

fn check_output_paths(doc: &Doc, _opts: &BundleOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    for (i, output) in outputs(doc) {
        if let Some(path) = get_str(output, "path") {
            if let Some(reason) = unsafe_path_reason(path) {
                out.push((
                    Some(format!("outputs[{}].path", i)),
                    format!("`{}`: {}", path, reason),
                ));
            }
        }
    }
    out
}

fn check_content_hashes(doc: &Doc, opts: &BundleOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    for (i, output) in outputs(doc) {
        let Some(hash) = get_str(output, "content_hash") else {
            continue;
        };
        if !is_sha256_ref(hash) {
            out.push((
                Some(format!("outputs[{}].content_hash", i)),
                format!("`{}` is not a sha256:<64 lowercase hex> reference", hash),
            ));
            continue;
        }
        if opts.deep_validation {
            if let Some(content) = get_str(output, "content") {
                let mut hasher = Sha256::new();
                hasher.update(content.as_bytes());
                let computed = format!("sha256:{:x}", hasher.finalize());
                if computed != hash {
                    out.push((
                        Some(format!("outputs[{}].content_hash", i)),
                        format!("declared {} but content hashes to {}", hash, computed),
                    ));
                }
            }
        }
    }
    out
}

fn constraint_lists(doc: &Doc) -> Vec<(String, Vec<String>)> {
    let mut lists = Vec::new();
    if let Some(root) = get_obj(doc, "root_node") {
        if let Some(cs) = string_vec(root, "constraints") {
            lists.push((
                "root_node.constraints".to_string(),
                cs.iter().map(|s| s.to_string()).collect(),
            ));
        }
    }
    if let Some(nodes) = get_arr(doc, "terminal_nodes") {
        for (i, node) in object_elements(nodes) {
            if let Some(cs) = string_vec(node, "constraints") {
                lists.push((
                    format!("terminal_nodes[{}].constraints", i),
                    cs.iter().map(|s| s.to_string()).collect(),
                ));
            }
        }
    }
    for (i, output) in outputs(doc) {
        if let Some(cs) = string_vec(output, "source_constraints") {
            lists.push((
                format!("outputs[{}].source_constraints", i),
                cs.iter().map(|s| s.to_string()).collect(),
            ));
        }
    }
    lists
}

fn check_constraint_lists(doc: &Doc, _opts: &BundleOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    for (path, list) in constraint_lists(doc) {
        if !is_sorted_strict(&list) {
            out.push((
                Some(path),
                "constraint list is not strictly sorted".to_string(),
            ));
        }
    }
    out
}

fn check_confidence(doc: &Doc, _opts: &BundleOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    for (i, output) in outputs(doc) {
        if let Some(confidence) = get_f64(output, "confidence") {
            if !(0.0..=1.0).contains(&confidence) {
                out.push((
                    Some(format!("outputs[{}].confidence", i)),
                    format!("confidence {} is out of range [0, 1]", confidence),
                ));
            }
        }
    }
    out
}

fn check_terminal_nodes_sorted(doc: &Doc, _opts: &BundleOptions) -> Vec<Finding> {
    let Some(nodes) = get_arr(doc, "terminal_nodes") else {
        return Vec::new();
    };
    let ids: Vec<&str> = object_elements(nodes)
        .filter_map(|(_, n)| get_str(n, "id"))
        .collect();
    if is_sorted_strict(&ids) {
        Vec::new()
    } else {
        vec![(
            Some("terminal_nodes".to_string()),
            "terminal_nodes are not strictly sorted by id".to_string(),
        )]
    }
}

fn check_question_order(doc: &Doc, _opts: &BundleOptions) -> Vec<Finding> {
    let Some(questions) = get_arr(doc, "unresolved_questions") else {
        return Vec::new();
    };
    let keys: Vec<(u64, &str)> = object_elements(questions)
        .filter_map(|(_, q)| Some((get_u64(q, "priority")?, get_str(q, "id")?)))
        .collect();
    // Priority descending, id ascending.
    let ordered = keys
        .windows(2)
        .all(|w| w[0].0 > w[1].0 || (w[0].0 == w[1].0 && w[0].1 < w[1].1));
    if ordered {
        Vec::new()
    } else {
        vec![(
            Some("unresolved_questions".to_string()),
            "questions are not sorted by priority descending then id ascending".to_string(),
        )]
    }
}

fn check_stats(doc: &Doc, _opts: &BundleOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(stats) = get_obj(doc, "stats") else {
        return out;
    };
    let output_count = outputs(doc).count() as u64;
    let question_count = get_arr(doc, "unresolved_questions").map_or(0, |q| q.len() as u64);
    let content_bytes: u64 = outputs(doc)
        .filter_map(|(_, o)| get_str(o, "content"))
        .map(|c| c.len() as u64)
        .sum();

    let expected = [
        ("output_count", output_count),
        ("question_count", question_count),
        ("total_content_bytes", content_bytes),
    ];
    for (key, want) in expected {
        if let Some(got) = get_u64(stats, key) {
            if got != want {
                out.push((
                    Some(format!("stats.{}", key)),
                    format!("declared {} but computed {}", got, want),
                ));
            }
        }
    }
    out
}

fn check_round_trip(doc: &Doc, _opts: &BundleOptions) -> Vec<Finding> {
    if canonical_round_trip_ok(&Value::Object(doc.clone())) {
        Vec::new()
    } else {
        vec![(
            None,
            "record does not survive canonical parse/re-encode".to_string(),
        )]
    }
}
