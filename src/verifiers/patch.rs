//! Patch-set verification (`PS*` rules).
//!
//! A patch set is the minimal unit the apply executor consumes: an ordered
//! list of create/modify/delete operations against relative paths, traced
//! back to the proposal it came from. Everything here is load-bearing for
//! safety — the executor trusts a verified patch set not to escape the
//! target root or smuggle symlinks.

use crate::core::canonical::canonical_round_trip_ok;
use crate::core::report::{
    Finding, Rule, SCHEMA_RULE, Verdict, json_type_name, run_checklist, top_level_gate,
};
use crate::core::shape::{
    get_arr, get_str, get_u64, object_elements, opt_str_field, str_field, u64_field,
};
use crate::core::paths::unsafe_path_reason;
use crate::verifiers::{is_semver, is_sha256_ref, project_without, seal};
use rustc_hash::FxHashSet;
use serde_json::{Map, Value};

pub const PATCH_OPS: &[&str] = &["create", "modify", "delete"];

/// Default ceiling on the total content payload of one patch set.
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 10 * 1024 * 1024;

const REQUIRED_TOP_LEVEL: &[&str] = &[
    "schema_version",
    "source_proposal_id",
    "source_proposal_hash",
    "operations",
    "total_bytes",
];

#[derive(Debug, Clone)]
pub struct PatchOptions {
    /// Caller ceiling for `total_bytes`.
    pub max_total_bytes: u64,
}

impl Default for PatchOptions {
    fn default() -> Self {
        PatchOptions {
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

type Doc = Map<String, Value>;

const RULES: &[Rule<Doc, PatchOptions>] = &[
    (SCHEMA_RULE, check_shape),
    ("PS1", check_schema_version),
    ("PS2", check_op_enum),
    ("PS3", check_path_safety),
    ("PS4", check_duplicate_targets),
    ("PS5", check_content_presence),
    ("PS6", check_content_nul),
    ("PS7", check_total_bytes_sum),
    ("PS8", check_operation_order),
    ("PS9", check_total_bytes_ceiling),
    ("PS10", check_symlink_refused),
    ("PS11", check_source_hash),
    ("PS12", check_round_trip),
];

/// Patch sets carry no ephemeral fields; the projection is the identity,
/// routed through the same seam as every other engine.
pub fn to_core(doc: &Doc) -> Value {
    project_without(doc, &[])
}

/// Verify a patch set.
pub fn verify(input: &Value, opts: &PatchOptions) -> Verdict {
    let doc = match top_level_gate(input, REQUIRED_TOP_LEVEL) {
        Ok(doc) => doc,
        Err(violations) => return Verdict::invalid(violations),
    };
    let violations = run_checklist(doc, opts, RULES);
    seal(to_core(doc), violations, "PS12")
}

fn operations(doc: &Doc) -> impl Iterator<Item = (usize, &Map<String, Value>)> {
    get_arr(doc, "operations").into_iter().flat_map(object_elements)
}

fn check_shape(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    str_field(doc, "schema_version", "", &mut out);
    str_field(doc, "source_proposal_id", "", &mut out);
    str_field(doc, "source_proposal_hash", "", &mut out);
    u64_field(doc, "total_bytes", "", &mut out);

    match doc.get("operations") {
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let at = format!("operations[{}]", i);
                let Some(op) = item.as_object() else {
                    out.push((
                        Some(at),
                        format!("expected object, found {}", json_type_name(item)),
                    ));
                    continue;
                };
                str_field(op, "op", &at, &mut out);
                str_field(op, "path", &at, &mut out);
                u64_field(op, "order", &at, &mut out);
                opt_str_field(op, "content", &at, &mut out);
            }
        }
        Some(other) => out.push((
            Some("operations".to_string()),
            format!("expected array, found {}", json_type_name(other)),
        )),
        None => {}
    }
    out
}

fn check_schema_version(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    match get_str(doc, "schema_version") {
        Some(v) if !is_semver(v) => vec![(
            Some("schema_version".to_string()),
            format!("`{}` is not a MAJOR.MINOR.PATCH version", v),
        )],
        _ => Vec::new(),
    }
}

fn check_op_enum(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    for (i, op) in operations(doc) {
        if let Some(kind) = get_str(op, "op") {
            if !PATCH_OPS.contains(&kind) {
                out.push((
                    Some(format!("operations[{}].op", i)),
                    format!("unknown op `{}`, expected one of {:?}", kind, PATCH_OPS),
                ));
            }
        }
    }
    out
}

fn check_path_safety(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    for (i, op) in operations(doc) {
        if let Some(path) = get_str(op, "path") {
            if let Some(reason) = unsafe_path_reason(path) {
                out.push((
                    Some(format!("operations[{}].path", i)),
                    format!("`{}`: {}", path, reason),
                ));
            }
        }
    }
    out
}

fn check_duplicate_targets(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for (i, op) in operations(doc) {
        if let Some(path) = get_str(op, "path") {
            if !seen.insert(path) {
                out.push((
                    Some(format!("operations[{}].path", i)),
                    format!("duplicate target `{}`", path),
                ));
            }
        }
    }
    out
}

fn check_content_presence(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    for (i, op) in operations(doc) {
        let has_content = op.get("content").is_some_and(|c| !c.is_null());
        match get_str(op, "op") {
            Some("create") | Some("modify") if !has_content => out.push((
                Some(format!("operations[{}].content", i)),
                "content is required for create/modify".to_string(),
            )),
            Some("delete") if has_content => out.push((
                Some(format!("operations[{}].content", i)),
                "content must be absent for delete".to_string(),
            )),
            _ => {}
        }
    }
    out
}

fn check_content_nul(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    for (i, op) in operations(doc) {
        if let Some(content) = get_str(op, "content") {
            if content.contains('\0') {
                out.push((
                    Some(format!("operations[{}].content", i)),
                    "content contains embedded NUL".to_string(),
                ));
            }
        }
    }
    out
}

fn check_total_bytes_sum(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    let Some(declared) = get_u64(doc, "total_bytes") else {
        return Vec::new();
    };
    let mut computed: u64 = 0;
    for (_, op) in operations(doc) {
        if let Some(content) = get_str(op, "content") {
            computed += content.len() as u64;
        }
    }
    if declared == computed {
        Vec::new()
    } else {
        vec![(
            Some("total_bytes".to_string()),
            format!(
                "total_bytes {} does not equal the sum of operation content lengths ({})",
                declared, computed
            ),
        )]
    }
}

fn check_operation_order(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    let mut previous: Option<(u64, &str)> = None;
    for (i, op) in operations(doc) {
        let (Some(order), Some(path)) = (get_u64(op, "order"), get_str(op, "path")) else {
            continue;
        };
        if let Some(prev) = previous {
            if (order, path) < prev {
                return vec![(
                    Some(format!("operations[{}]", i)),
                    "operations are not sorted by (order, path)".to_string(),
                )];
            }
        }
        previous = Some((order, path));
    }
    Vec::new()
}

fn check_total_bytes_ceiling(doc: &Doc, opts: &PatchOptions) -> Vec<Finding> {
    match get_u64(doc, "total_bytes") {
        Some(total) if total > opts.max_total_bytes => vec![(
            Some("total_bytes".to_string()),
            format!(
                "total_bytes {} exceeds the ceiling of {}",
                total, opts.max_total_bytes
            ),
        )],
        _ => Vec::new(),
    }
}

fn check_symlink_refused(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    let mut out = Vec::new();
    for (i, op) in operations(doc) {
        if get_str(op, "op") == Some("symlink") {
            out.push((
                Some(format!("operations[{}].op", i)),
                "symlink operations are refused".to_string(),
            ));
        }
    }
    out
}

fn check_source_hash(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    match get_str(doc, "source_proposal_hash") {
        Some(h) if !is_sha256_ref(h) => vec![(
            Some("source_proposal_hash".to_string()),
            format!("`{}` is not a sha256:<64 lowercase hex> reference", h),
        )],
        _ => Vec::new(),
    }
}

fn check_round_trip(doc: &Doc, _opts: &PatchOptions) -> Vec<Finding> {
    if canonical_round_trip_ok(&Value::Object(doc.clone())) {
        Vec::new()
    } else {
        vec![(
            None,
            "record does not survive canonical parse/re-encode".to_string(),
        )]
    }
}
