//! Canonical form and content-addressed hashing.
//!
//! Every artifact Verdict signs off on is hashed over its canonical form:
//! a deterministic textual encoding that is independent of key insertion
//! order, locale, and process restarts. Two independent computations of
//! "the same" artifact must serialize byte-identically here or the whole
//! content-addressing story falls apart.
//!
//! # Rules
//!
//! - Object keys are sorted by code-point order, recursively
//! - Arrays preserve element order
//! - No whitespace between tokens
//! - Minimal string escaping (RFC 8785 style: `"`, `\`, and C0 controls)
//! - Integers must stay within the safe range `|n| <= 2^53 - 1`
//! - Non-finite numbers and excessive nesting are rejected, never coerced

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use thiserror::Error;

/// Maximum nesting depth accepted by the canonicalizer.
pub const MAX_DEPTH: usize = 128;

/// Largest integer magnitude that survives every JSON decoder intact.
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// A value that cannot be canonicalized. Never silently coerced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("non-finite number cannot be canonicalized")]
    NonFiniteNumber,
    #[error("integer outside safe range: {value}")]
    NumberOutOfRange { value: String },
    #[error("value nested deeper than {max} levels")]
    MaxDepthExceeded { max: usize },
}

/// Render `value` in canonical form.
///
/// Canonicalization is total over null, booleans, finite numbers, strings,
/// arrays, and string-keyed objects. Anything else (there is nothing else
/// in a `serde_json::Value`, but integers beyond the safe range and
/// pathological nesting count) fails with a [`CanonicalError`].
pub fn canonicalize(value: &Value) -> Result<String, CanonicalError> {
    let mut out = String::new();
    emit_value(value, &mut out, 0)?;
    Ok(out)
}

/// `sha256:`-prefixed lowercase-hex SHA-256 over the canonical form.
pub fn canonical_hash(value: &Value) -> Result<String, CanonicalError> {
    let text = canonicalize(value)?;
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// Whether `value` survives a canonicalize -> parse -> canonicalize cycle
/// unchanged. Engines convert a `false` into a violation, never a crash.
pub fn canonical_round_trip_ok(value: &Value) -> bool {
    let first = match canonicalize(value) {
        Ok(t) => t,
        Err(_) => return false,
    };
    let reparsed: Value = match serde_json::from_str(&first) {
        Ok(v) => v,
        Err(_) => return false,
    };
    match canonicalize(&reparsed) {
        Ok(second) => first == second,
        Err(_) => false,
    }
}

fn emit_value(value: &Value, out: &mut String, depth: usize) -> Result<(), CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError::MaxDepthExceeded { max: MAX_DEPTH });
    }
    match value {
        Value::Null => {
            out.push_str("null");
            Ok(())
        }
        Value::Bool(b) => {
            out.push_str(if *b { "true" } else { "false" });
            Ok(())
        }
        Value::Number(n) => emit_number(n, out),
        Value::String(s) => {
            emit_string(s, out);
            Ok(())
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                emit_value(item, out, depth + 1)?;
            }
            out.push(']');
            Ok(())
        }
        Value::Object(map) => emit_object(map, out, depth),
    }
}

fn emit_number(n: &Number, out: &mut String) -> Result<(), CanonicalError> {
    if let Some(i) = n.as_i64() {
        if i.unsigned_abs() > MAX_SAFE_INTEGER {
            return Err(CanonicalError::NumberOutOfRange {
                value: i.to_string(),
            });
        }
        let _ = write!(out, "{}", i);
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        if u > MAX_SAFE_INTEGER {
            return Err(CanonicalError::NumberOutOfRange {
                value: u.to_string(),
            });
        }
        let _ = write!(out, "{}", u);
        return Ok(());
    }
    match n.as_f64() {
        Some(f) if f.is_finite() => {
            // serde_json renders floats via ryu (shortest round-trip form),
            // which is stable across platforms.
            let _ = write!(out, "{}", n);
            Ok(())
        }
        _ => Err(CanonicalError::NonFiniteNumber),
    }
}

fn emit_object(
    map: &Map<String, Value>,
    out: &mut String,
    depth: usize,
) -> Result<(), CanonicalError> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        emit_string(key, out);
        out.push(':');
        emit_value(&map[*key], out, depth + 1)?;
    }
    out.push('}');
    Ok(())
}

fn emit_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c <= '\u{001F}' => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
