//! Directory-level pack checker behavior, on real temp directories.

use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use verdict::verifiers::bundle::{self, BundleOptions};
use verdict::verifiers::pack::{self, PackOptions, PackReport};

fn valid_bundle() -> Value {
    json!({
        "id": "bundle_20260823_0001",
        "schema_version": "1.0.0",
        "status": "complete",
        "root_node": {
            "id": "n0",
            "goal": "Ship the auth module",
            "constraints": ["must-compile"]
        },
        "terminal_nodes": [{"id": "n1", "constraints": ["must-compile"]}],
        "outputs": [{
            "path": "src/index.ts",
            "content": "hello",
            "content_hash":
                "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
            "source_constraints": ["must-compile"],
            "confidence": 0.9
        }],
        "unresolved_questions": [],
        "stats": {"output_count": 1, "question_count": 0, "total_content_bytes": 5}
    })
}

fn write_json(dir: &Path, name: &str, value: &Value) {
    fs::write(dir.join(name), serde_json::to_string_pretty(value).unwrap()).unwrap();
}

/// Write a complete, internally consistent pack. Returns the bundle hash
/// embedded in run.json.
fn write_valid_pack(dir: &Path) -> String {
    let bundle = valid_bundle();
    let hash = bundle::verify(&bundle, &BundleOptions::default())
        .hash
        .expect("fixture bundle must be valid");
    write_json(dir, "bundle.json", &bundle);
    write_json(
        dir,
        "run.json",
        &json!({
            "schema_version": "1.0.0",
            "run_id": "run_20260823_0001",
            "result": {"kind": "SUCCESS"},
            "bundle_sha256": hash,
            "policy": {"max_risk": "low"}
        }),
    );
    write_json(dir, "policy.json", &json!({"max_risk": "low"}));
    write_json(dir, "meta.json", &json!({"generator": "pipeline-ci"}));
    write_json(dir, "evidence.json", &json!({}));
    write_json(dir, "model_io.json", &json!({"request": {}, "response": {}}));
    fs::write(
        dir.join("ledger.jsonl"),
        concat!(
            "{\"ts\":\"2026-08-23T12:00:00.000Z\",\"event\":\"run_started\"}\n",
            "{\"ts\":\"2026-08-23T12:00:02.000Z\",\"event\":\"run_completed\"}\n"
        ),
    )
    .unwrap();
    hash
}

fn rule_ids(report: &PackReport) -> Vec<&str> {
    report
        .violations
        .iter()
        .map(|v| v.rule_id.as_str())
        .collect()
}

#[test]
fn consistent_pack_verifies_clean() {
    let dir = tempdir().unwrap();
    write_valid_pack(dir.path());

    let report = pack::verify(dir.path(), &PackOptions::default());
    assert!(report.valid, "violations: {:?}", report.violations);
    assert_eq!(
        report.verified_files,
        vec![
            "bundle.json",
            "evidence.json",
            "ledger.jsonl",
            "meta.json",
            "model_io.json",
            "policy.json",
            "run.json"
        ]
    );
    assert_eq!(report.reference_checks.len(), 1);
    let check = &report.reference_checks[0];
    assert!(check.matched);
    assert_eq!(check.source, "run.json");
    assert_eq!(check.target, "bundle.json");
    assert_eq!(check.expected, check.computed);
}

#[test]
fn declared_bundle_hash_mismatch_names_both_hashes() {
    let dir = tempdir().unwrap();
    let real_hash = write_valid_pack(dir.path());

    let fake = format!("sha256:{}", "a".repeat(64));
    let run = fs::read_to_string(dir.path().join("run.json")).unwrap();
    let mut run: Value = serde_json::from_str(&run).unwrap();
    run["bundle_sha256"] = json!(fake);
    write_json(dir.path(), "run.json", &run);

    let report = pack::verify(dir.path(), &PackOptions::default());
    assert!(!report.valid);
    assert_eq!(rule_ids(&report), vec!["PK5"]);
    let msg = &report.violations[0].message;
    assert!(msg.contains(&fake));
    assert!(msg.contains(&real_hash));
    assert!(!report.reference_checks[0].matched);
}

#[test]
fn files_outside_the_manifest_are_flagged() {
    let dir = tempdir().unwrap();
    write_valid_pack(dir.path());
    fs::write(dir.path().join("notes.txt"), "scratch").unwrap();

    let report = pack::verify(dir.path(), &PackOptions::default());
    assert_eq!(rule_ids(&report), vec!["PK2"]);
    assert_eq!(report.violations[0].path.as_deref(), Some("notes.txt"));
}

#[cfg(unix)]
#[test]
fn symlinked_entry_yields_both_symlink_and_irregular_file_signals() {
    let dir = tempdir().unwrap();
    write_valid_pack(dir.path());
    std::os::unix::fs::symlink(dir.path().join("run.json"), dir.path().join("patch.json"))
        .unwrap();

    let report = pack::verify(dir.path(), &PackOptions::default());
    let ids = rule_ids(&report);
    assert!(ids.contains(&"PK3"));
    assert!(ids.contains(&"PK4"));
    // The symlinked file is never counted as verified.
    assert!(!report.verified_files.iter().any(|f| f == "patch.json"));
}

#[test]
fn refused_runs_do_not_require_a_bundle() {
    let dir = tempdir().unwrap();
    write_json(
        dir.path(),
        "run.json",
        &json!({
            "schema_version": "1.0.0",
            "run_id": "run_20260823_0002",
            "result": {"kind": "REFUSE"}
        }),
    );

    let report = pack::verify(dir.path(), &PackOptions::default());
    assert!(report.valid, "violations: {:?}", report.violations);
}

#[test]
fn missing_bundle_on_a_successful_run_is_flagged() {
    let dir = tempdir().unwrap();
    write_valid_pack(dir.path());
    fs::remove_file(dir.path().join("bundle.json")).unwrap();

    let report = pack::verify(dir.path(), &PackOptions::default());
    assert_eq!(rule_ids(&report), vec!["PK7"]);
}

#[test]
fn one_bad_ledger_line_does_not_hide_the_others() {
    let dir = tempdir().unwrap();
    write_valid_pack(dir.path());
    fs::write(
        dir.path().join("ledger.jsonl"),
        concat!(
            "{\"ts\":\"2026-08-23T12:00:00.000Z\",\"event\":\"run_started\"}\n",
            "{not json at all\n",
            "{\"ts\":\"2026-08-23T12:00:02.000Z\",\"event\":\"run_completed\"}\n"
        ),
    )
    .unwrap();

    let report = pack::verify(dir.path(), &PackOptions::default());
    assert_eq!(rule_ids(&report), vec!["PK10"]);
    assert_eq!(report.violations[0].path.as_deref(), Some("ledger.jsonl:2"));
}

#[test]
fn ledger_timestamps_must_be_strict_utc() {
    let dir = tempdir().unwrap();
    write_valid_pack(dir.path());
    fs::write(
        dir.path().join("ledger.jsonl"),
        "{\"ts\":\"2026-08-23 12:00:00\",\"event\":\"run_started\"}\n",
    )
    .unwrap();

    let report = pack::verify(dir.path(), &PackOptions::default());
    assert_eq!(rule_ids(&report), vec!["PK10"]);
    assert_eq!(report.violations[0].path.as_deref(), Some("ledger.jsonl:1"));
    assert!(report.violations[0].message.contains("UTC timestamp"));
}

#[test]
fn policy_file_must_match_the_embedded_policy() {
    let dir = tempdir().unwrap();
    write_valid_pack(dir.path());
    write_json(dir.path(), "policy.json", &json!({"max_risk": "high"}));

    let report = pack::verify(dir.path(), &PackOptions::default());
    assert_eq!(rule_ids(&report), vec!["PK12"]);
}

#[test]
fn deep_validation_surfaces_inner_rule_ids() {
    let dir = tempdir().unwrap();
    write_valid_pack(dir.path());
    let mut bundle = valid_bundle();
    bundle["status"] = json!("weird");
    write_json(dir.path(), "bundle.json", &bundle);

    let report = pack::verify(dir.path(), &PackOptions::default());
    let pk7: Vec<_> = report
        .violations
        .iter()
        .filter(|v| v.rule_id == "PK7")
        .collect();
    assert_eq!(pk7.len(), 1);
    assert_eq!(pk7[0].path.as_deref(), Some("bundle.json#status"));
    assert!(pk7[0].message.contains("[BN2]"));
    // Tampering also broke the declared hash reference.
    assert!(rule_ids(&report).contains(&"PK5"));
}

#[test]
fn shallow_mode_skips_delegation_and_references() {
    let dir = tempdir().unwrap();
    write_valid_pack(dir.path());
    let mut bundle = valid_bundle();
    bundle["status"] = json!("weird");
    write_json(dir.path(), "bundle.json", &bundle);

    let opts = PackOptions {
        verify_references: false,
        deep_validation: false,
    };
    let report = pack::verify(dir.path(), &opts);
    assert!(report.valid, "violations: {:?}", report.violations);
    assert!(report.reference_checks.is_empty());
}

#[test]
fn inaccessible_pack_path_is_reported_not_thrown() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("no-such-pack");

    let report = pack::verify(&missing, &PackOptions::default());
    assert!(!report.valid);
    assert_eq!(rule_ids(&report), vec!["PK1"]);
    assert!(report.verified_files.is_empty());
}

#[test]
fn malformed_model_io_is_flagged() {
    let dir = tempdir().unwrap();
    write_valid_pack(dir.path());
    write_json(dir.path(), "model_io.json", &json!({"request": {}}));

    let report = pack::verify(dir.path(), &PackOptions::default());
    assert_eq!(rule_ids(&report), vec!["PK9"]);
}
