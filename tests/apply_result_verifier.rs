//! Apply-result engine behavior.

use serde_json::{Value, json};
use verdict::core::report::Verdict;
use verdict::verifiers::apply_result;

const AFTER_HASH: &str =
    "sha256:ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb";

fn valid_result() -> Value {
    json!({
        "schema_version": "1.0.0",
        "outcome": "SUCCESS",
        "dry_run": false,
        "target_root": ".",
        "operation_results": [
            {
                "op": "create",
                "path": "src/a.ts",
                "status": "success",
                "before_hash": null,
                "after_hash": AFTER_HASH
            }
        ],
        "summary": {"total": 1, "succeeded": 1, "skipped": 0, "errors": 0}
    })
}

fn rule_ids(verdict: &Verdict) -> Vec<&str> {
    verdict
        .violations
        .iter()
        .map(|v| v.rule_id.as_str())
        .collect()
}

#[test]
fn valid_result_gets_a_hash() {
    let verdict = apply_result::verify(&valid_result());
    assert!(verdict.valid, "violations: {:?}", verdict.violations);
    assert!(verdict.hash.is_some());
}

#[test]
fn hash_ignores_ephemeral() {
    let a = valid_result();
    let mut b = valid_result();
    b["ephemeral"] = json!({"applied_at": "2026-08-23T12:00:00.000Z"});
    assert_eq!(
        apply_result::verify(&a).hash,
        apply_result::verify(&b).hash
    );
}

#[test]
fn summary_must_aggregate_the_operations() {
    let mut doc = valid_result();
    doc["summary"]["succeeded"] = json!(2);
    doc["summary"]["total"] = json!(2);

    let verdict = apply_result::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["AR5", "AR5"]);
}

#[test]
fn failed_outcome_requires_an_error_message() {
    let mut doc = valid_result();
    doc["outcome"] = json!("FAILED");

    let verdict = apply_result::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["AR7"]);

    doc["error"] = json!("apply aborted: write refused by sandbox");
    assert!(apply_result::verify(&doc).valid);
}

#[test]
fn spurious_error_on_success_is_flagged() {
    let mut doc = valid_result();
    doc["error"] = json!("nothing actually failed");
    let verdict = apply_result::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["AR7"]);
}

#[test]
fn error_operation_forces_error_and_summary_accounting() {
    let mut doc = valid_result();
    doc["operation_results"][0]["status"] = json!("error");

    let verdict = apply_result::verify(&doc);
    let ids = rule_ids(&verdict);
    // succeeded/errors both disagree with the aggregate, and the error
    // message is missing.
    assert_eq!(ids, vec!["AR5", "AR5", "AR7"]);
}

#[test]
fn unknown_outcome_is_flagged() {
    let mut doc = valid_result();
    doc["outcome"] = json!("PARTIAL");
    let verdict = apply_result::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["AR1"]);
}

#[test]
fn absolute_target_root_is_rejected() {
    let mut doc = valid_result();
    doc["target_root"] = json!("/srv/app");
    let verdict = apply_result::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["AR2"]);
}

#[test]
fn malformed_after_hash_is_flagged() {
    let mut doc = valid_result();
    doc["operation_results"][0]["after_hash"] = json!("sha256:XYZ");
    let verdict = apply_result::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["AR4"]);
}

#[test]
fn unsorted_violation_list_is_flagged() {
    let mut doc = valid_result();
    doc["violations"] = json!(["b rule", "a rule"]);
    let verdict = apply_result::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["AR6"]);
}
