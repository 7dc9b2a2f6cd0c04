//! Canonical string rendering used to give arrays a stable order.
//!
//! Scalars render as their text, arrays as their sorted canonical elements and
//! objects as sorted `key.value` pairs, all joined with `.`. Sorting two arrays by
//! this rendering and comparing them index-wise stands in for multiset equality.
//! Distinct structures can collide (`"a.b"` and `["a", "b"]` render alike); such
//! collisions are accepted and not special-cased.

use serde_json::{Number, Value};

const SEPARATOR: &str = ".";

/// Render any value as a deterministic string.
pub fn canonical_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => canonical_number(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let mut chunks: Vec<String> = items.iter().map(canonical_string).collect();
            chunks.sort();
            chunks.join(SEPARATOR)
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut chunks = Vec::with_capacity(entries.len() * 2);
            for (key, value) in entries {
                chunks.push(key.clone());
                chunks.push(canonical_string(value));
            }
            chunks.join(SEPARATOR)
        }
    }
}

// Integral floats render like integers so values `compare` treats as equal sort
// identically.
fn canonical_number(n: &Number) -> String {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            return f.to_string();
        }
    }
    n.to_string()
}

/// Borrow the items of an array ordered by their canonical string.
pub fn sort_by_canonical(items: &[Value]) -> Vec<&Value> {
    let mut keyed: Vec<(String, &Value)> = items.iter().map(|v| (canonical_string(v), v)).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, v)| v).collect()
}
