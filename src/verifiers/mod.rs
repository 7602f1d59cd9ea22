//! The seven rule engines, one per artifact type.
//!
//! Uniform contract: take already-JSON-decoded input, never panic, run
//! every applicable rule, return a sorted violation list, and attach the
//! content hash only when the artifact is clean. The directory-level pack
//! checker composes the document engines and is the only one doing I/O.

pub mod apply_result;
pub mod bundle;
pub mod pack;
pub mod patch;
pub mod proposal;
pub mod repo_state;
pub mod runner;

use crate::core::canonical::canonical_hash;
use crate::core::report::{Verdict, Violation, sort_violations};
use regex::Regex;
use serde_json::{Map, Value};

/// `sha256:` + 64 lowercase hex chars. The only accepted content-address
/// shape anywhere in the artifact set.
pub(crate) fn is_sha256_ref(text: &str) -> bool {
    Regex::new(r"^sha256:[0-9a-f]{64}$")
        .expect("hash pattern is valid")
        .is_match(text)
}

/// Plain `MAJOR.MINOR.PATCH` semver triple.
pub(crate) fn is_semver(text: &str) -> bool {
    Regex::new(r"^\d+\.\d+\.\d+$")
        .expect("semver pattern is valid")
        .is_match(text)
}

/// Core projection: the document minus its ephemeral top-level keys,
/// omitted rather than nulled. Pure and total.
pub(crate) fn project_without(doc: &Map<String, Value>, ephemeral: &[&str]) -> Value {
    let core: Map<String, Value> = doc
        .iter()
        .filter(|(key, _)| !ephemeral.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Value::Object(core)
}

/// Sort the violation list once and, on a clean run, attach the canonical
/// hash of the core projection. A hash failure at this point means the
/// round-trip rule missed something, so it is surfaced under that rule's
/// id rather than swallowed.
pub(crate) fn seal(
    core: Value,
    mut violations: Vec<Violation>,
    round_trip_rule: &str,
) -> Verdict {
    if violations.is_empty() {
        match canonical_hash(&core) {
            Ok(hash) => {
                return Verdict {
                    valid: true,
                    violations,
                    hash: Some(hash),
                };
            }
            Err(err) => {
                violations.push(Violation::new(
                    round_trip_rule,
                    None,
                    format!("core projection cannot be canonicalized: {}", err),
                ));
            }
        }
    }
    sort_violations(&mut violations);
    Verdict {
        valid: false,
        violations,
        hash: None,
    }
}
