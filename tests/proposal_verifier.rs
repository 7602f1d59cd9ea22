//! Proposal engine behavior.

use serde_json::{Value, json};
use verdict::core::report::Verdict;
use verdict::verifiers::proposal;

fn valid_proposal() -> Value {
    json!({
        "schema_version": "1.0.0",
        "proposal_id": "prop_20260823_abc123",
        "kind": "feature",
        "summary": "Add a login flow behind the auth policy gate",
        "target_paths": ["src/auth.ts", "src/routes.ts"],
        "risk": "low",
        "status": "draft"
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
fn valid_proposal_gets_a_hash() {
    let verdict = proposal::verify(&valid_proposal());
    assert!(verdict.valid, "violations: {:?}", verdict.violations);
    assert!(verdict.hash.is_some());
}

#[test]
fn hash_ignores_ephemeral() {
    let a = valid_proposal();
    let mut b = valid_proposal();
    b["ephemeral"] = json!({"draft_session": "s_991"});
    assert_eq!(proposal::verify(&a).hash, proposal::verify(&b).hash);
}

#[test]
fn approved_status_requires_an_approver() {
    let mut doc = valid_proposal();
    doc["status"] = json!("approved");

    let verdict = proposal::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["PR9"]);

    doc["approved_by"] = json!("reviewer@ops");
    assert!(proposal::verify(&doc).valid);
}

#[test]
fn approver_on_a_draft_is_flagged() {
    let mut doc = valid_proposal();
    doc["approved_by"] = json!("reviewer@ops");
    let verdict = proposal::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["PR9"]);
}

#[test]
fn proposal_id_format_is_enforced() {
    let mut doc = valid_proposal();
    doc["proposal_id"] = json!("prop_2026_xyz");
    let verdict = proposal::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["PR2"]);
}

#[test]
fn enums_are_checked_independently() {
    let mut doc = valid_proposal();
    doc["kind"] = json!("rewrite");
    doc["risk"] = json!("extreme");
    doc["status"] = json!("pending");

    let verdict = proposal::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["PR3", "PR4", "PR5"]);
}

#[test]
fn target_paths_must_be_present_sorted_and_safe() {
    let mut doc = valid_proposal();
    doc["target_paths"] = json!([]);
    assert_eq!(rule_ids(&proposal::verify(&doc)), vec!["PR6"]);

    doc["target_paths"] = json!(["src/b.ts", "src/a.ts"]);
    assert_eq!(rule_ids(&proposal::verify(&doc)), vec!["PR6"]);

    doc["target_paths"] = json!(["/etc/shadow"]);
    let verdict = proposal::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["PR6"]);
    assert_eq!(verdict.violations[0].path.as_deref(), Some("target_paths[0]"));
}

#[test]
fn malformed_bundle_hash_is_flagged() {
    let mut doc = valid_proposal();
    doc["bundle_hash"] = json!("sha1:deadbeef");
    let verdict = proposal::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["PR7"]);
}

#[test]
fn blank_summary_is_rejected() {
    let mut doc = valid_proposal();
    doc["summary"] = json!("   ");
    let verdict = proposal::verify(&doc);
    assert_eq!(rule_ids(&verdict), vec!["PR8"]);
}
