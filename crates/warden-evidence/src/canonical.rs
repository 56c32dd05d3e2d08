//! Canonical JSON serialization.
//!
//! Object keys are sorted recursively and arrays keep their declared
//! order, so two semantically identical values always serialize to the
//! same bytes regardless of how they were constructed. This is the only
//! serialization ever fed to a hash.

use serde_json::{Map, Value};

/// Serialize a JSON value to canonical bytes.
pub fn canonicalize(value: &Value) -> Vec<u8> {
    // serde_json::Map preserves insertion order, so rebuilding each
    // object with sorted keys yields deterministic output.
    let sorted = sort_value(value);
    serde_json::to_vec(&sorted).unwrap_or_default()
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::with_capacity(map.len());
            for key in keys {
                out.insert(key.clone(), sort_value(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn test_array_order_is_preserved() {
        let a = json!({ "items": [1, 2, 3] });
        let b = json!({ "items": [3, 2, 1] });
        assert_ne!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn test_nested_objects_inside_arrays_are_sorted() {
        let a: Value = serde_json::from_str(r#"[{"b": 1, "a": 2}]"#).unwrap();
        let b: Value = serde_json::from_str(r#"[{"a": 2, "b": 1}]"#).unwrap();
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn test_scalars_round_trip() {
        for v in [json!(null), json!(true), json!(42), json!("text")] {
            let bytes = canonicalize(&v);
            let back: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(back, v);
        }
    }
}
