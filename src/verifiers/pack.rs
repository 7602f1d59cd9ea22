//! Directory-level pack verification (`PK*` rules).
//!
//! A pack is a directory bundling one run's artifacts plus the
//! cross-references between them. This is the only engine that touches the
//! filesystem; it does so synchronously and sequentially, with symlink
//! detection via `symlink_metadata`. Concurrent modification of the
//! directory during a scan is not detected — the TOCTOU window is accepted
//! because these checks are a review aid, not a sandbox boundary.
//!
//! Broken entries keep the scan going: a symlinked `bundle.json` yields
//! both an is-symlink and a not-a-regular-file violation (two distinct
//! audit signals), and a bad ledger line never hides the lines after it.

use crate::core::canonical::{canonical_hash, canonicalize};
use crate::core::report::{Verdict, Violation, sort_violations};
use crate::core::shape::{get_obj, get_str};
use crate::core::time::parse_utc_millis;
use crate::verifiers::{bundle, patch};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// The only filenames a pack may contain.
pub const PACK_MANIFEST: &[&str] = &[
    "bundle.json",
    "evidence.json",
    "ledger.jsonl",
    "meta.json",
    "model_io.json",
    "patch.json",
    "policy.json",
    "run.json",
];

/// Result kinds `run.json` may declare.
pub const RESULT_KINDS: &[&str] = &["SUCCESS", "FAILURE", "REFUSE"];

/// Fields every ledger line must carry.
pub const LEDGER_REQUIRED_FIELDS: &[&str] = &["ts", "event"];

#[derive(Debug, Clone)]
pub struct PackOptions {
    /// Recompute and compare declared cross-file hashes (PK5).
    pub verify_references: bool,
    /// Delegate bundle.json/patch.json to their document engines.
    pub deep_validation: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        PackOptions {
            verify_references: true,
            deep_validation: true,
        }
    }
}

/// One recomputed cross-file reference, emitted on both match and
/// mismatch so the audit trail shows what was actually compared.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceCheck {
    pub source: String,
    pub target: String,
    pub field: String,
    pub expected: String,
    pub computed: String,
    #[serde(rename = "match")]
    pub matched: bool,
}

/// Full pack verification report: not just a boolean, but what was
/// examined and which references were recomputed.
#[derive(Debug, Clone, Serialize)]
pub struct PackReport {
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub verified_files: Vec<String>,
    pub reference_checks: Vec<ReferenceCheck>,
}

/// Verify a pack directory.
///
/// Never panics and never returns early when something else can still be
/// evaluated; an inaccessible pack path yields a report whose only
/// violations are PK1.
pub fn verify(dir: &Path, opts: &PackOptions) -> PackReport {
    let mut violations: Vec<Violation> = Vec::new();
    let mut verified_files: Vec<String> = Vec::new();
    let mut reference_checks: Vec<ReferenceCheck> = Vec::new();

    let mut scannable = true;
    match fs::symlink_metadata(dir) {
        Err(err) => {
            violations.push(Violation::new(
                "PK1",
                None,
                format!("pack path `{}` is inaccessible: {}", dir.display(), err),
            ));
            scannable = false;
        }
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                violations.push(Violation::new(
                    "PK1",
                    None,
                    format!("pack path `{}` is itself a symlink", dir.display()),
                ));
            }
            if !dir.is_dir() {
                violations.push(Violation::new(
                    "PK1",
                    None,
                    format!("pack path `{}` is not a directory", dir.display()),
                ));
                scannable = false;
            }
        }
    }

    if scannable {
        scan_entries(dir, &mut violations, &mut verified_files);
        check_documents(
            dir,
            opts,
            &mut violations,
            &mut reference_checks,
            &verified_files,
        );
    }

    verified_files.sort();
    sort_violations(&mut violations);
    PackReport {
        valid: violations.is_empty(),
        violations,
        verified_files,
        reference_checks,
    }
}

/// List entries sorted for determinism; flag unknown names, symlinks, and
/// non-regular files without stopping the scan.
fn scan_entries(dir: &Path, violations: &mut Vec<Violation>, verified: &mut Vec<String>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            violations.push(Violation::new(
                "PK1",
                None,
                format!("pack directory cannot be listed: {}", err),
            ));
            return;
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    for name in names {
        if !PACK_MANIFEST.contains(&name.as_str()) {
            violations.push(Violation::new(
                "PK2",
                Some(name.clone()),
                format!("`{}` is not in the pack manifest allowlist", name),
            ));
        }

        let full = dir.join(&name);
        let Ok(meta) = fs::symlink_metadata(&full) else {
            continue;
        };
        if meta.file_type().is_symlink() {
            violations.push(Violation::new(
                "PK3",
                Some(name.clone()),
                format!("`{}` is a symlink", name),
            ));
        }
        if !meta.file_type().is_file() {
            // Fires alongside PK3 for symlinks; the two signals are
            // distinct on purpose.
            violations.push(Violation::new(
                "PK4",
                Some(name.clone()),
                format!("`{}` is not a regular file", name),
            ));
        }
        if meta.file_type().is_file() && PACK_MANIFEST.contains(&name.as_str()) {
            verified.push(name);
        }
    }
}

fn read_json(dir: &Path, name: &str) -> Result<Value, String> {
    let text =
        fs::read_to_string(dir.join(name)).map_err(|e| format!("`{}` is unreadable: {}", name, e))?;
    serde_json::from_str(&text).map_err(|e| format!("`{}` is not valid JSON: {}", name, e))
}

fn check_documents(
    dir: &Path,
    opts: &PackOptions,
    violations: &mut Vec<Violation>,
    reference_checks: &mut Vec<ReferenceCheck>,
    present: &[String],
) {
    let has = |name: &str| present.iter().any(|p| p == name);

    // run.json is the pack's spine; everything else hangs off it.
    let run = match read_json(dir, "run.json") {
        Ok(value) => match value.as_object() {
            Some(map) => Some(map.clone()),
            None => {
                violations.push(Violation::new(
                    "PK6",
                    Some("run.json".to_string()),
                    "run.json must be a JSON object".to_string(),
                ));
                None
            }
        },
        Err(msg) => {
            violations.push(Violation::new("PK6", Some("run.json".to_string()), msg));
            None
        }
    };

    let mut result_kind: Option<String> = None;
    if let Some(run) = &run {
        for key in ["schema_version", "run_id"] {
            if run.get(key).and_then(Value::as_str).is_none() {
                violations.push(Violation::new(
                    "PK6",
                    Some("run.json".to_string()),
                    format!("run.json is missing required string field `{}`", key),
                ));
            }
        }
        match get_obj(run, "result").and_then(|r| get_str(r, "kind")) {
            Some(kind) if RESULT_KINDS.contains(&kind) => {
                result_kind = Some(kind.to_string());
            }
            Some(kind) => violations.push(Violation::new(
                "PK6",
                Some("run.json".to_string()),
                format!(
                    "unknown result kind `{}`, expected one of {:?}",
                    kind, RESULT_KINDS
                ),
            )),
            None => violations.push(Violation::new(
                "PK6",
                Some("run.json".to_string()),
                "run.json is missing `result.kind`".to_string(),
            )),
        }
    }

    // bundle.json: required unless the run refused to produce one.
    let bundle_required = result_kind.as_deref() != Some("REFUSE");
    let mut bundle_doc: Option<Map<String, Value>> = None;
    if has("bundle.json") {
        match read_json(dir, "bundle.json") {
            Ok(value) => {
                if opts.deep_validation {
                    retag(
                        violations,
                        "PK7",
                        "bundle.json",
                        &bundle::verify(&value, &bundle::BundleOptions::default()),
                    );
                }
                bundle_doc = value.as_object().cloned();
            }
            Err(msg) => {
                violations.push(Violation::new("PK7", Some("bundle.json".to_string()), msg));
            }
        }
    } else if bundle_required && run.is_some() {
        violations.push(Violation::new(
            "PK7",
            Some("bundle.json".to_string()),
            "bundle.json is required unless run.json declares REFUSE".to_string(),
        ));
    }

    // Cross-file hash reference.
    if opts.verify_references {
        if let (Some(run), Some(bundle_doc)) = (&run, &bundle_doc) {
            if let Some(expected) = run.get("bundle_sha256").and_then(Value::as_str) {
                let computed = canonical_hash(&bundle::to_core(bundle_doc))
                    .unwrap_or_else(|err| format!("<uncomputable: {}>", err));
                let matched = computed == expected;
                reference_checks.push(ReferenceCheck {
                    source: "run.json".to_string(),
                    target: "bundle.json".to_string(),
                    field: "bundle_sha256".to_string(),
                    expected: expected.to_string(),
                    computed: computed.clone(),
                    matched,
                });
                if !matched {
                    violations.push(Violation::new(
                        "PK5",
                        Some("run.json".to_string()),
                        format!(
                            "declared bundle hash {} does not match computed {}",
                            expected, computed
                        ),
                    ));
                }
            }
        }
    }

    // patch.json: optional, deep-validated when present.
    if has("patch.json") {
        match read_json(dir, "patch.json") {
            Ok(value) => {
                if opts.deep_validation {
                    retag(
                        violations,
                        "PK8",
                        "patch.json",
                        &patch::verify(&value, &patch::PatchOptions::default()),
                    );
                }
            }
            Err(msg) => {
                violations.push(Violation::new("PK8", Some("patch.json".to_string()), msg));
            }
        }
    }

    // model_io.json: shallow structural check only.
    if has("model_io.json") {
        match read_json(dir, "model_io.json") {
            Ok(value) => {
                let ok = value
                    .as_object()
                    .is_some_and(|m| {
                        m.get("request").is_some_and(Value::is_object)
                            && m.get("response").is_some_and(Value::is_object)
                    });
                if !ok {
                    violations.push(Violation::new(
                        "PK9",
                        Some("model_io.json".to_string()),
                        "model_io.json must be an object with `request` and `response` objects"
                            .to_string(),
                    ));
                }
            }
            Err(msg) => {
                violations.push(Violation::new("PK9", Some("model_io.json".to_string()), msg));
            }
        }
    }

    // ledger.jsonl: line-by-line; one bad line does not stop the rest.
    if has("ledger.jsonl") {
        check_ledger(dir, violations);
    }

    // meta.json: syntax only. Contents are deliberately never validated;
    // the file is the pack author's scratch space.
    if has("meta.json") {
        if let Err(msg) = read_json(dir, "meta.json") {
            violations.push(Violation::new("PK11", Some("meta.json".to_string()), msg));
        }
    }

    // policy.json must canonically equal the policy embedded in run.json.
    if has("policy.json") {
        match read_json(dir, "policy.json") {
            Ok(standalone) => {
                let embedded = run.as_ref().and_then(|r| r.get("policy"));
                match embedded {
                    Some(embedded) => {
                        let same = match (canonicalize(&standalone), canonicalize(embedded)) {
                            (Ok(a), Ok(b)) => a == b,
                            _ => false,
                        };
                        if !same {
                            violations.push(Violation::new(
                                "PK12",
                                Some("policy.json".to_string()),
                                "policy.json does not match the policy embedded in run.json"
                                    .to_string(),
                            ));
                        }
                    }
                    None => {
                        if run.is_some() {
                            violations.push(Violation::new(
                                "PK12",
                                Some("policy.json".to_string()),
                                "policy.json is present but run.json embeds no policy".to_string(),
                            ));
                        }
                    }
                }
            }
            Err(msg) => {
                violations.push(Violation::new("PK12", Some("policy.json".to_string()), msg));
            }
        }
    }

    // evidence.json: must at least be an object.
    if has("evidence.json") {
        match read_json(dir, "evidence.json") {
            Ok(value) if !value.is_object() => {
                violations.push(Violation::new(
                    "PK13",
                    Some("evidence.json".to_string()),
                    "evidence.json must be a JSON object".to_string(),
                ));
            }
            Ok(_) => {}
            Err(msg) => {
                violations.push(Violation::new("PK13", Some("evidence.json".to_string()), msg));
            }
        }
    }
}

fn check_ledger(dir: &Path, violations: &mut Vec<Violation>) {
    let text = match fs::read_to_string(dir.join("ledger.jsonl")) {
        Ok(text) => text,
        Err(err) => {
            violations.push(Violation::new(
                "PK10",
                Some("ledger.jsonl".to_string()),
                format!("`ledger.jsonl` is unreadable: {}", err),
            ));
            return;
        }
    };
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let lineno = i + 1;
        let at = format!("ledger.jsonl:{}", lineno);
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(entry)) => {
                for key in LEDGER_REQUIRED_FIELDS {
                    if entry.get(*key).and_then(Value::as_str).is_none() {
                        violations.push(Violation::new(
                            "PK10",
                            Some(at.clone()),
                            format!("ledger line {} is missing string field `{}`", lineno, key),
                        ));
                    }
                }
                if let Some(ts) = get_str(&entry, "ts") {
                    if parse_utc_millis(ts).is_none() {
                        violations.push(Violation::new(
                            "PK10",
                            Some(at.clone()),
                            format!("ledger line {} `ts` is not a UTC timestamp: `{}`", lineno, ts),
                        ));
                    }
                }
            }
            Ok(_) => violations.push(Violation::new(
                "PK10",
                Some(at),
                format!("ledger line {} is not a JSON object", lineno),
            )),
            Err(err) => violations.push(Violation::new(
                "PK10",
                Some(at),
                format!("ledger line {} is not valid JSON: {}", lineno, err),
            )),
        }
    }
}

/// Re-tag a document engine's sub-violations under the enclosing file's
/// rule id, keeping the original rule id visible in the message.
fn retag(violations: &mut Vec<Violation>, rule_id: &str, file: &str, verdict: &Verdict) {
    for sub in &verdict.violations {
        let location = match &sub.path {
            Some(p) => format!("{}#{}", file, p),
            None => file.to_string(),
        };
        violations.push(Violation::new(
            rule_id,
            Some(location),
            format!("[{}] {}", sub.rule_id, sub.message),
        ));
    }
}
