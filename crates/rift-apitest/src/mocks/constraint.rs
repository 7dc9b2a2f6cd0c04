//! Request constraints checked before a definition replies.
//!
//! Constraints are pure predicates over a buffered request: they never touch call
//! counters and report every failure as a `ConstraintViolation` value.

use super::error::ConstraintViolation;
use super::request::{parse_query_values, MockRequest};
use crate::compare::{compare, compare_query, ComparisonOptions};
use crate::xml::{self, XmlError};
use regex::Regex;
use serde_json::Value;
use serde_json_path::JsonPath;
use std::collections::BTreeMap;

/// Failure to build a constraint from its configured arguments.
#[derive(Debug, thiserror::Error)]
pub enum ConstraintBuildError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error("invalid regexp: {0}")]
    Regex(#[from] regex::Error),
    #[error("invalid JSON path {path}: {reason}")]
    JsonPath { path: String, reason: String },
}

/// A configured request constraint.
#[derive(Debug)]
pub enum RequestConstraint {
    Nop,
    BodyMatchesJson {
        expected: Value,
        options: ComparisonOptions,
    },
    BodyMatchesXml {
        expected: Value,
        options: ComparisonOptions,
    },
    BodyJsonFieldMatchesJson {
        path: String,
        selector: JsonPath,
        expected: Value,
        options: ComparisonOptions,
    },
    BodyMatchesText {
        body: String,
        regexp: Option<Regex>,
    },
    PathMatches {
        path: String,
        regexp: Option<Regex>,
    },
    MethodIs(String),
    HeaderIs {
        header: String,
        value: String,
        regexp: Option<Regex>,
    },
    QueryMatches(BTreeMap<String, Vec<String>>),
    QueryMatchesRegexp(BTreeMap<String, Vec<String>>),
}

impl RequestConstraint {
    pub fn body_matches_json(
        body: &str,
        options: ComparisonOptions,
    ) -> Result<Self, ConstraintBuildError> {
        Ok(RequestConstraint::BodyMatchesJson {
            expected: serde_json::from_str(body)?,
            options,
        })
    }

    pub fn body_matches_xml(
        body: &str,
        options: ComparisonOptions,
    ) -> Result<Self, ConstraintBuildError> {
        Ok(RequestConstraint::BodyMatchesXml {
            expected: xml::parse(body)?,
            options,
        })
    }

    /// `path` is either a JSONPath (`$.a.b[0]`) or a dotted path (`a.b.0`).
    pub fn body_json_field_matches_json(
        path: &str,
        value: &str,
        options: ComparisonOptions,
    ) -> Result<Self, ConstraintBuildError> {
        let normalized = normalize_field_path(path);
        let selector =
            JsonPath::parse(&normalized).map_err(|e| ConstraintBuildError::JsonPath {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(RequestConstraint::BodyJsonFieldMatchesJson {
            path: path.to_string(),
            selector,
            expected: serde_json::from_str(value)?,
            options,
        })
    }

    pub fn body_matches_text(body: &str, regexp: &str) -> Result<Self, ConstraintBuildError> {
        Ok(RequestConstraint::BodyMatchesText {
            body: body.to_string(),
            regexp: compile_optional(regexp)?,
        })
    }

    pub fn path_matches(path: &str, regexp: &str) -> Result<Self, ConstraintBuildError> {
        Ok(RequestConstraint::PathMatches {
            path: path.to_string(),
            regexp: compile_optional(regexp)?,
        })
    }

    pub fn method_is(method: &str) -> Self {
        RequestConstraint::MethodIs(method.to_string())
    }

    pub fn header_is(header: &str, value: &str, regexp: &str) -> Result<Self, ConstraintBuildError> {
        Ok(RequestConstraint::HeaderIs {
            header: header.to_string(),
            value: value.to_string(),
            regexp: compile_optional(regexp)?,
        })
    }

    pub fn query_matches(query: &str) -> Self {
        RequestConstraint::QueryMatches(parse_query_values(query).into_iter().collect())
    }

    pub fn query_matches_regexp(query: &str) -> Self {
        RequestConstraint::QueryMatchesRegexp(parse_query_values(query).into_iter().collect())
    }

    /// Configuration name of this constraint.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestConstraint::Nop => "nop",
            RequestConstraint::BodyMatchesJson { .. } => "bodyMatchesJSON",
            RequestConstraint::BodyMatchesXml { .. } => "bodyMatchesXML",
            RequestConstraint::BodyJsonFieldMatchesJson { .. } => "bodyJSONFieldMatchesJSON",
            RequestConstraint::BodyMatchesText { .. } => "bodyMatchesText",
            RequestConstraint::PathMatches { .. } => "pathMatches",
            RequestConstraint::MethodIs(_) => "methodIs",
            RequestConstraint::HeaderIs { .. } => "headerIs",
            RequestConstraint::QueryMatches(_) => "queryMatches",
            RequestConstraint::QueryMatchesRegexp(_) => "queryMatchesRegexp",
        }
    }

    pub fn verify(&self, request: &MockRequest) -> Vec<ConstraintViolation> {
        match self {
            RequestConstraint::Nop => Vec::new(),
            RequestConstraint::BodyMatchesJson { expected, options } => {
                match decode_body(request, |body| {
                    serde_json::from_slice(body).map_err(|e| e.to_string())
                }) {
                    Ok(actual) => mismatches(expected, &actual, options),
                    Err(violation) => vec![violation],
                }
            }
            RequestConstraint::BodyMatchesXml { expected, options } => {
                match decode_body(request, |body| {
                    xml::parse(&String::from_utf8_lossy(body)).map_err(|e| e.to_string())
                }) {
                    Ok(actual) => mismatches(expected, &actual, options),
                    Err(violation) => vec![violation],
                }
            }
            RequestConstraint::BodyJsonFieldMatchesJson {
                path,
                selector,
                expected,
                options,
            } => match extract_field(request, path, selector) {
                Ok(actual) => mismatches(expected, &actual, options),
                Err(violation) => vec![violation],
            },
            RequestConstraint::BodyMatchesText { body, regexp } => {
                let actual = request.body_text();
                if !body.is_empty() && *body != actual {
                    return vec![ConstraintViolation::BodyMismatch {
                        actual,
                        expected: body.clone(),
                    }];
                }
                match regexp {
                    Some(rx) if !rx.is_match(&actual) => vec![ConstraintViolation::BodyRegex {
                        actual,
                        pattern: rx.to_string(),
                    }],
                    _ => Vec::new(),
                }
            }
            RequestConstraint::PathMatches { path, regexp } => {
                let actual = request.decoded_path();
                let actual: &str = &actual;
                if !path.is_empty() && path != actual {
                    return vec![ConstraintViolation::PathMismatch {
                        actual: actual.to_string(),
                        expected: path.clone(),
                    }];
                }
                match regexp {
                    Some(rx) if !rx.is_match(actual) => vec![ConstraintViolation::PathRegex {
                        actual: actual.to_string(),
                        pattern: rx.to_string(),
                    }],
                    _ => Vec::new(),
                }
            }
            RequestConstraint::MethodIs(method) => {
                if request.method.as_str().eq_ignore_ascii_case(method) {
                    Vec::new()
                } else {
                    vec![ConstraintViolation::MethodMismatch {
                        expected: method.clone(),
                        actual: request.method.to_string(),
                    }]
                }
            }
            RequestConstraint::HeaderIs {
                header,
                value,
                regexp,
            } => {
                let actual = match request.header(header) {
                    Some(v) if !v.is_empty() => v,
                    _ => return vec![ConstraintViolation::HeaderMissing(header.clone())],
                };
                if !value.is_empty() && value != actual {
                    return vec![ConstraintViolation::HeaderValue {
                        header: header.clone(),
                        actual: actual.to_string(),
                        expected: value.clone(),
                    }];
                }
                match regexp {
                    Some(rx) if !rx.is_match(actual) => vec![ConstraintViolation::HeaderRegex {
                        header: header.clone(),
                        actual: actual.to_string(),
                        pattern: rx.to_string(),
                    }],
                    _ => Vec::new(),
                }
            }
            RequestConstraint::QueryMatches(expected)
            | RequestConstraint::QueryMatchesRegexp(expected) => verify_query(expected, request),
        }
    }
}

fn compile_optional(pattern: &str) -> Result<Option<Regex>, regex::Error> {
    if pattern.is_empty() {
        Ok(None)
    } else {
        Regex::new(pattern).map(Some)
    }
}

fn mismatches(
    expected: &Value,
    actual: &Value,
    options: &ComparisonOptions,
) -> Vec<ConstraintViolation> {
    compare(expected, actual, options)
        .into_iter()
        .map(ConstraintViolation::Mismatch)
        .collect()
}

fn decode_body(
    request: &MockRequest,
    decode: impl FnOnce(&[u8]) -> Result<Value, String>,
) -> Result<Value, ConstraintViolation> {
    if request.body.is_empty() {
        return Err(ConstraintViolation::EmptyBody);
    }
    decode(&request.body).map_err(ConstraintViolation::InvalidBody)
}

// A string field is itself decoded as JSON; any other field is used as is.
fn extract_field(
    request: &MockRequest,
    path: &str,
    selector: &JsonPath,
) -> Result<Value, ConstraintViolation> {
    let document = decode_body(request, |body| {
        serde_json::from_slice(body).map_err(|e| e.to_string())
    })?;
    let nodes = selector.query(&document).all();
    let field = nodes
        .first()
        .ok_or_else(|| ConstraintViolation::FieldMissing(path.to_string()))?;

    match field {
        Value::Null => Err(ConstraintViolation::FieldEmpty(path.to_string())),
        Value::String(raw) if raw.is_empty() => {
            Err(ConstraintViolation::FieldEmpty(path.to_string()))
        }
        Value::String(raw) => {
            serde_json::from_str(raw).map_err(|e| ConstraintViolation::FieldInvalid {
                path: path.to_string(),
                reason: e.to_string(),
            })
        }
        other => Ok((*other).clone()),
    }
}

fn verify_query(
    expected: &BTreeMap<String, Vec<String>>,
    request: &MockRequest,
) -> Vec<ConstraintViolation> {
    let actual = request.query_values();
    let mut violations = Vec::new();
    for (key, want) in expected {
        let Some(got) = actual.get(key) else {
            violations.push(ConstraintViolation::QueryKeyMissing(key.clone()));
            continue;
        };
        match compare_query(want, got) {
            Ok(true) => {}
            Ok(false) => violations.push(ConstraintViolation::QueryMismatch {
                key: key.clone(),
                expected: want.clone(),
                actual: got.clone(),
            }),
            Err(e) => violations.push(ConstraintViolation::QueryRegex {
                key: key.clone(),
                reason: e.to_string(),
            }),
        }
    }
    violations
}

/// Turn a dotted field path into JSONPath; JSONPath input is kept as is.
fn normalize_field_path(path: &str) -> String {
    if path.starts_with('$') {
        return path.to_string();
    }
    let mut normalized = String::from("$");
    for segment in path.split('.') {
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            normalized.push_str(&format!("[{segment}]"));
        } else {
            normalized.push_str(&format!("['{}']", segment.replace('\'', "\\'")));
        }
    }
    normalized
}
