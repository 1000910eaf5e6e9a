//! Canonical JSON encoding for hashing.
//!
//! The TrustLog hash chain requires a byte-stable rendition of each
//! entry: UTF-8, object keys sorted lexicographically at every level, no
//! insignificant whitespace, and non-ASCII characters emitted as-is
//! rather than `\u` escapes. `serde_json`'s compact writer already
//! satisfies the whitespace and UTF-8 requirements; this module adds the
//! recursive key ordering.

use serde_json::{Map, Value};

/// Render `value` in canonical form.
///
/// Keys are sorted recursively; arrays keep their order. Numbers are
/// emitted exactly as `serde_json` would print them, so a value that
/// round-trips through `serde_json` hashes identically.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

/// Canonical form as bytes, for feeding a hasher directly.
#[must_use]
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    canonical_json(value).into_bytes()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_sorted_at_every_level() {
        let value = json!({"b": {"z": 1, "a": 2}, "a": [ {"y": 1, "x": 2} ]});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":[{"x":2,"y":1}],"b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn arrays_keep_order() {
        let value = json!([3, 1, 2]);
        assert_eq!(canonical_json(&value), "[3,1,2]");
    }

    #[test]
    fn non_ascii_preserved() {
        let value = json!({"q": "傘を持つべき？"});
        let canon = canonical_json(&value);
        assert!(canon.contains("傘を持つべき？"));
        assert!(!canon.contains("\\u"));
    }

    #[test]
    fn stable_across_insertion_order() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }
}
