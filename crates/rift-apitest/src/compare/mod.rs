//! Structural, type-aware comparison of decoded values.
//!
//! This module provides:
//! - `compare`: recursive expected-vs-actual comparison yielding located mismatches
//! - `compare_query`: order-independent matching of query parameter value lists
//! - `canonical_string`: stable stringification used for order-insensitive arrays
//!
//! Any expected string of the form `$matchRegexp(<pattern>)` is treated as a regex
//! directive: the actual value must match `<pattern>` instead of being equal to it.
//!
//! ## Module Structure
//!
//! - `canonical`: canonical string rendering and array sorting
//! - `query`: greedy multiset matching of query values

mod canonical;
mod query;

pub use canonical::{canonical_string, sort_by_canonical};
pub use query::compare_query;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

/// Options for one `compare` call, applied to the whole descent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ComparisonOptions {
    /// Only compare structure and types, never scalar values.
    #[serde(default)]
    pub ignore_values: bool,
    /// Compare arrays as multisets.
    #[serde(default, rename = "ignoreArraysOrdering")]
    pub ignore_array_order: bool,
    /// Require objects to have exactly the expected number of keys.
    #[serde(default)]
    pub disallow_extra_fields: bool,
}

impl ComparisonOptions {
    /// Options used by request body verifiers unless overridden: arrays are unordered.
    pub fn unordered_arrays() -> Self {
        Self {
            ignore_array_order: true,
            ..Self::default()
        }
    }
}

/// Variant tag of a decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Map,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Map,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Map => "map",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of mismatch found at a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareErrorKind {
    TypeMismatch,
    ValueMismatch,
    RegexCompile,
    RegexMismatch,
    ArrayLength,
    MapLength,
    MissingKey,
}

impl CompareErrorKind {
    pub fn message(&self) -> &'static str {
        match self {
            CompareErrorKind::TypeMismatch => "types do not match",
            CompareErrorKind::ValueMismatch => "values do not match",
            CompareErrorKind::RegexCompile => "can not compile regex",
            CompareErrorKind::RegexMismatch => "value does not match regex",
            CompareErrorKind::ArrayLength => "array lengths do not match",
            CompareErrorKind::MapLength => "map lengths do not match",
            CompareErrorKind::MissingKey => "key is missing",
        }
    }
}

/// A mismatch tagged with a JSONPath-like locator (`$.a[3].b`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "at path {path} {}:\n     expected: {expected}\n       actual: {actual}",
    .kind.message()
)]
pub struct LocatedError {
    pub path: String,
    pub kind: CompareErrorKind,
    pub expected: String,
    pub actual: String,
}

impl LocatedError {
    fn new(
        path: &str,
        kind: CompareErrorKind,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        Self {
            path: path.to_string(),
            kind,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Compare `expected` against `actual`; an empty result means they match.
pub fn compare(expected: &Value, actual: &Value, options: &ComparisonOptions) -> Vec<LocatedError> {
    let mut errors = Vec::new();
    compare_branch("$", expected, actual, options, &mut errors);
    errors
}

fn compare_branch(
    path: &str,
    expected: &Value,
    actual: &Value,
    options: &ComparisonOptions,
    errors: &mut Vec<LocatedError>,
) {
    let expected_kind = ValueKind::of(expected);
    let actual_kind = ValueKind::of(actual);

    if expected_kind != actual_kind {
        errors.push(LocatedError::new(
            path,
            CompareErrorKind::TypeMismatch,
            expected_kind,
            actual_kind,
        ));
        return;
    }

    match (expected, actual) {
        (Value::Null, Value::Null) => {}
        (Value::Array(expected_items), Value::Array(actual_items)) => {
            if expected_items.len() != actual_items.len() {
                errors.push(LocatedError::new(
                    path,
                    CompareErrorKind::ArrayLength,
                    expected_items.len(),
                    actual_items.len(),
                ));
                return;
            }

            let (expected_items, actual_items): (Vec<&Value>, Vec<&Value>) =
                if options.ignore_array_order {
                    (
                        sort_by_canonical(expected_items),
                        sort_by_canonical(actual_items),
                    )
                } else {
                    (expected_items.iter().collect(), actual_items.iter().collect())
                };

            for (i, (e, a)) in expected_items.iter().zip(actual_items.iter()).enumerate() {
                compare_branch(&format!("{path}[{i}]"), e, a, options, errors);
            }
        }
        (Value::Object(expected_map), Value::Object(actual_map)) => {
            if options.disallow_extra_fields && expected_map.len() != actual_map.len() {
                errors.push(LocatedError::new(
                    path,
                    CompareErrorKind::MapLength,
                    expected_map.len(),
                    actual_map.len(),
                ));
                return;
            }

            let mut entries: Vec<(&String, &Value)> = expected_map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, expected_value) in entries {
                let Some(actual_value) = actual_map.get(key) else {
                    errors.push(LocatedError::new(
                        path,
                        CompareErrorKind::MissingKey,
                        key,
                        "<missing>",
                    ));
                    continue;
                };
                compare_branch(
                    &format!("{path}.{key}"),
                    expected_value,
                    actual_value,
                    options,
                    errors,
                );
            }
        }
        _ if options.ignore_values => {}
        _ => compare_leafs(path, expected, actual, errors),
    }
}

fn compare_leafs(path: &str, expected: &Value, actual: &Value, errors: &mut Vec<LocatedError>) {
    if let (Value::String(directive), Value::String(value)) = (expected, actual) {
        if let Some(pattern) = regex_directive(directive) {
            match Regex::new(pattern) {
                Ok(rx) if rx.is_match(value) => {}
                Ok(_) => errors.push(LocatedError::new(
                    path,
                    CompareErrorKind::RegexMismatch,
                    directive,
                    value,
                )),
                Err(_) => errors.push(LocatedError::new(
                    path,
                    CompareErrorKind::RegexCompile,
                    "<nil>",
                    "error",
                )),
            }
            return;
        }
    }

    if !scalars_equal(expected, actual) {
        errors.push(LocatedError::new(
            path,
            CompareErrorKind::ValueMismatch,
            render_scalar(expected),
            render_scalar(actual),
        ));
    }
}

/// Extract `<pattern>` from a `$matchRegexp(<pattern>)` directive.
pub fn regex_directive(value: &str) -> Option<&str> {
    value
        .strip_prefix("$matchRegexp(")
        .and_then(|rest| rest.strip_suffix(')'))
        .filter(|pattern| !pattern.is_empty() && !pattern.contains('\n'))
}

fn scalars_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(e), Value::Number(a)) => numbers_equal(e, a),
        _ => expected == actual,
    }
}

// Integers compare exactly; anything involving a float compares as f64.
fn numbers_equal(expected: &Number, actual: &Number) -> bool {
    if let (Some(e), Some(a)) = (expected.as_i64(), actual.as_i64()) {
        return e == a;
    }
    if let (Some(e), Some(a)) = (expected.as_u64(), actual.as_u64()) {
        return e == a;
    }
    match (expected.as_f64(), actual.as_f64()) {
        (Some(e), Some(a)) => e == a,
        _ => false,
    }
}

/// Render a scalar the way it appears in mismatch reports (strings unquoted).
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
