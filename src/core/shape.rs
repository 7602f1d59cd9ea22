//! Incremental narrowing of untyped JSON input.
//!
//! Engines receive already-decoded `serde_json::Value` and must never
//! panic on a wrong shape. The reporting helpers here are used by each
//! engine's `SCHEMA` rule to walk the nested document and name every type
//! mismatch; the silent accessors let semantic rules skip slices the
//! schema walk already flagged.

use crate::core::report::{Finding, json_type_name};
use serde_json::{Map, Value};

/// Dotted field path for violation locations (`at` empty at top level).
pub fn field_path(at: &str, key: &str) -> String {
    if at.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", at, key)
    }
}

fn report_kind(value: &Value, expected: &str, path: &str, out: &mut Vec<Finding>) {
    out.push((
        Some(path.to_string()),
        format!("expected {}, found {}", expected, json_type_name(value)),
    ));
}

fn report_missing(path: &str, out: &mut Vec<Finding>) {
    out.push((Some(path.to_string()), format!("missing required field `{}`", path)));
}

// ---- reporting accessors (required fields) ----

pub fn str_field<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    at: &str,
    out: &mut Vec<Finding>,
) -> Option<&'a str> {
    let path = field_path(at, key);
    match map.get(key) {
        None => {
            report_missing(&path, out);
            None
        }
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            report_kind(other, "string", &path, out);
            None
        }
    }
}

pub fn u64_field(
    map: &Map<String, Value>,
    key: &str,
    at: &str,
    out: &mut Vec<Finding>,
) -> Option<u64> {
    let path = field_path(at, key);
    match map.get(key) {
        None => {
            report_missing(&path, out);
            None
        }
        Some(Value::Number(n)) if n.as_u64().is_some() => n.as_u64(),
        Some(other) => {
            report_kind(other, "non-negative integer", &path, out);
            None
        }
    }
}

pub fn i64_field(
    map: &Map<String, Value>,
    key: &str,
    at: &str,
    out: &mut Vec<Finding>,
) -> Option<i64> {
    let path = field_path(at, key);
    match map.get(key) {
        None => {
            report_missing(&path, out);
            None
        }
        Some(Value::Number(n)) if n.as_i64().is_some() => n.as_i64(),
        Some(other) => {
            report_kind(other, "integer", &path, out);
            None
        }
    }
}

pub fn bool_field(
    map: &Map<String, Value>,
    key: &str,
    at: &str,
    out: &mut Vec<Finding>,
) -> Option<bool> {
    let path = field_path(at, key);
    match map.get(key) {
        None => {
            report_missing(&path, out);
            None
        }
        Some(Value::Bool(b)) => Some(*b),
        Some(other) => {
            report_kind(other, "boolean", &path, out);
            None
        }
    }
}

pub fn obj_field<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    at: &str,
    out: &mut Vec<Finding>,
) -> Option<&'a Map<String, Value>> {
    let path = field_path(at, key);
    match map.get(key) {
        None => {
            report_missing(&path, out);
            None
        }
        Some(Value::Object(o)) => Some(o),
        Some(other) => {
            report_kind(other, "object", &path, out);
            None
        }
    }
}

pub fn array_field<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    at: &str,
    out: &mut Vec<Finding>,
) -> Option<&'a [Value]> {
    let path = field_path(at, key);
    match map.get(key) {
        None => {
            report_missing(&path, out);
            None
        }
        Some(Value::Array(items)) => Some(items),
        Some(other) => {
            report_kind(other, "array", &path, out);
            None
        }
    }
}

/// Required array of strings; every mis-typed element is reported.
pub fn string_array_field(
    map: &Map<String, Value>,
    key: &str,
    at: &str,
    out: &mut Vec<Finding>,
) {
    let path = field_path(at, key);
    let Some(items) = array_field(map, key, at, out) else {
        return;
    };
    for (i, item) in items.iter().enumerate() {
        if !item.is_string() {
            report_kind(item, "string", &format!("{}[{}]", path, i), out);
        }
    }
}

// ---- reporting accessors (optional fields) ----

pub fn opt_str_field<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    at: &str,
    out: &mut Vec<Finding>,
) -> Option<&'a str> {
    match map.get(key) {
        None => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            report_kind(other, "string", &field_path(at, key), out);
            None
        }
    }
}

pub fn opt_obj_field<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    at: &str,
    out: &mut Vec<Finding>,
) -> Option<&'a Map<String, Value>> {
    match map.get(key) {
        None => None,
        Some(Value::Object(o)) => Some(o),
        Some(other) => {
            report_kind(other, "object", &field_path(at, key), out);
            None
        }
    }
}

pub fn opt_u64_field(
    map: &Map<String, Value>,
    key: &str,
    at: &str,
    out: &mut Vec<Finding>,
) -> Option<u64> {
    match map.get(key) {
        None => None,
        Some(Value::Number(n)) if n.as_u64().is_some() => n.as_u64(),
        Some(other) => {
            report_kind(other, "non-negative integer", &field_path(at, key), out);
            None
        }
    }
}

// ---- silent accessors for semantic rules ----

pub fn get_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

pub fn get_u64(map: &Map<String, Value>, key: &str) -> Option<u64> {
    map.get(key).and_then(Value::as_u64)
}

pub fn get_i64(map: &Map<String, Value>, key: &str) -> Option<i64> {
    map.get(key).and_then(Value::as_i64)
}

pub fn get_f64(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(Value::as_f64)
}

pub fn get_bool(map: &Map<String, Value>, key: &str) -> Option<bool> {
    map.get(key).and_then(Value::as_bool)
}

pub fn get_arr<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a [Value]> {
    map.get(key).and_then(Value::as_array).map(Vec::as_slice)
}

pub fn get_obj<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    map.get(key).and_then(Value::as_object)
}

/// Array of objects, silently skipping mis-typed elements (the schema walk
/// reports those). Yields the element index alongside the object.
pub fn object_elements<'a>(
    items: &'a [Value],
) -> impl Iterator<Item = (usize, &'a Map<String, Value>)> {
    items
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.as_object().map(|o| (i, o)))
}

/// String elements of an array field, or `None` if the field is not an
/// array of strings throughout.
pub fn string_vec<'a>(map: &'a Map<String, Value>, key: &str) -> Option<Vec<&'a str>> {
    let items = get_arr(map, key)?;
    items.iter().map(Value::as_str).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reporting_accessors_name_the_mismatch() {
        let doc = json!({"a": 1, "b": {"c": true}});
        let map = doc.as_object().unwrap();
        let mut out = Vec::new();
        assert!(str_field(map, "a", "", &mut out).is_none());
        assert!(str_field(map, "missing", "", &mut out).is_none());
        assert!(obj_field(map, "b", "", &mut out).is_some());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0.as_deref(), Some("a"));
        assert!(out[0].1.contains("expected string, found number"));
        assert!(out[1].1.contains("missing required field"));
    }

    #[test]
    fn string_array_reports_per_element() {
        let doc = json!({"xs": ["ok", 3, null]});
        let map = doc.as_object().unwrap();
        let mut out = Vec::new();
        string_array_field(map, "xs", "", &mut out);
        let paths: Vec<&str> = out.iter().filter_map(|f| f.0.as_deref()).collect();
        assert_eq!(paths, vec!["xs[1]", "xs[2]"]);
    }

    #[test]
    fn silent_accessors_do_not_report() {
        let doc = json!({"n": "not a number"});
        let map = doc.as_object().unwrap();
        assert_eq!(get_u64(map, "n"), None);
        assert_eq!(string_vec(map, "n"), None);
    }
}
