//! Bundle engine behavior.

use serde_json::{Value, json};
use verdict::core::report::Verdict;
use verdict::verifiers::bundle::{self, BundleOptions};

const HELLO_HASH: &str =
    "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn valid_bundle() -> Value {
    json!({
        "id": "bundle_20260823_0001",
        "schema_version": "1.0.0",
        "status": "complete",
        "root_node": {
            "id": "n0",
            "goal": "Ship the auth module",
            "constraints": ["must-compile", "no-new-deps"]
        },
        "terminal_nodes": [
            {"id": "n1", "constraints": ["must-compile"]}
        ],
        "outputs": [
            {
                "path": "src/index.ts",
                "content": "hello",
                "content_hash": HELLO_HASH,
                "source_constraints": ["must-compile"],
                "confidence": 0.9
            }
        ],
        "unresolved_questions": [
            {"id": "q1", "priority": 5, "category": "api"}
        ],
        "stats": {
            "output_count": 1,
            "question_count": 1,
            "total_content_bytes": 5
        }
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
fn valid_bundle_gets_a_hash() {
    let verdict = bundle::verify(&valid_bundle(), &BundleOptions::default());
    assert!(verdict.valid, "violations: {:?}", verdict.violations);
    assert!(verdict.hash.is_some());
}

#[test]
fn tampered_content_fails_deep_hash_check() {
    let mut doc = valid_bundle();
    // Same length, so stats stay consistent and only the hash breaks.
    doc["outputs"][0]["content"] = json!("jello");

    let verdict = bundle::verify(&doc, &BundleOptions::default());
    assert_eq!(rule_ids(&verdict), vec!["BN5"]);
    let msg = &verdict.violations[0].message;
    assert!(msg.contains(HELLO_HASH));
    assert!(msg.contains("187c9bceeb919e1b"));
}

#[test]
fn shallow_validation_only_checks_hash_shape() {
    let mut doc = valid_bundle();
    doc["outputs"][0]["content"] = json!("jello");
    let opts = BundleOptions {
        deep_validation: false,
    };
    assert!(bundle::verify(&doc, &opts).valid);

    doc["outputs"][0]["content_hash"] = json!("md5:whatever");
    let verdict = bundle::verify(&doc, &opts);
    assert_eq!(rule_ids(&verdict), vec!["BN5"]);
}

#[test]
fn outputs_must_be_strictly_sorted_by_path() {
    let mut doc = valid_bundle();
    doc["outputs"] = json!([
        {
            "path": "src/b.ts",
            "content": "b",
            "content_hash": "sha256:3e23e8160039594a33894f6564e1b1348bbd7a0088d42c4acb73eeaed59c009d",
            "source_constraints": [],
            "confidence": 1.0
        },
        {
            "path": "src/a.ts",
            "content": "a",
            "content_hash": "sha256:ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb",
            "source_constraints": [],
            "confidence": 1.0
        }
    ]);
    doc["stats"] = json!({"output_count": 2, "question_count": 1, "total_content_bytes": 2});

    let verdict = bundle::verify(&doc, &BundleOptions::default());
    assert_eq!(rule_ids(&verdict), vec!["BN3"]);
}

#[test]
fn duplicate_constraints_break_strict_ordering() {
    let mut doc = valid_bundle();
    doc["root_node"]["constraints"] = json!(["must-compile", "must-compile"]);
    let verdict = bundle::verify(&doc, &BundleOptions::default());
    assert_eq!(rule_ids(&verdict), vec!["BN6"]);
    assert_eq!(
        verdict.violations[0].path.as_deref(),
        Some("root_node.constraints")
    );
}

#[test]
fn confidence_is_clamped_to_unit_interval() {
    let mut doc = valid_bundle();
    doc["outputs"][0]["confidence"] = json!(1.5);
    let verdict = bundle::verify(&doc, &BundleOptions::default());
    assert_eq!(rule_ids(&verdict), vec!["BN7"]);
}

#[test]
fn questions_sort_by_priority_desc_then_id_asc() {
    let mut doc = valid_bundle();
    doc["unresolved_questions"] = json!([
        {"id": "q1", "priority": 1, "category": "api"},
        {"id": "q2", "priority": 5, "category": "api"}
    ]);
    doc["stats"]["question_count"] = json!(2);

    let verdict = bundle::verify(&doc, &BundleOptions::default());
    assert_eq!(rule_ids(&verdict), vec!["BN9"]);

    doc["unresolved_questions"] = json!([
        {"id": "q2", "priority": 5, "category": "api"},
        {"id": "q1", "priority": 1, "category": "api"}
    ]);
    assert!(bundle::verify(&doc, &BundleOptions::default()).valid);
}

#[test]
fn stats_are_cross_checked_against_the_document() {
    let mut doc = valid_bundle();
    doc["stats"]["output_count"] = json!(3);
    let verdict = bundle::verify(&doc, &BundleOptions::default());
    assert_eq!(rule_ids(&verdict), vec!["BN10"]);
    assert!(verdict.violations[0].message.contains("declared 3 but computed 1"));
}

#[test]
fn unknown_status_is_flagged() {
    let mut doc = valid_bundle();
    doc["status"] = json!("half-done");
    let verdict = bundle::verify(&doc, &BundleOptions::default());
    assert_eq!(rule_ids(&verdict), vec!["BN2"]);
}
