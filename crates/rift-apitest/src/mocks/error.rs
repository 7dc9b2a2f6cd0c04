//! Error types for the mock subsystem.
//!
//! Runtime failures (`MockError`) are collected as values and returned at the end of
//! a running context; configuration failures (`LoadError`) abort loading.

use crate::compare::LocatedError;
use std::net::SocketAddr;

/// Why a single request constraint rejected a request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstraintViolation {
    #[error("{0}")]
    Mismatch(#[from] LocatedError),
    #[error("request is empty")]
    EmptyBody,
    #[error("request body can not be decoded: {0}")]
    InvalidBody(String),
    #[error("json field {0} does not exist")]
    FieldMissing(String),
    #[error("json field {0} is empty")]
    FieldEmpty(String),
    #[error("json field {path} can not be decoded: {reason}")]
    FieldInvalid { path: String, reason: String },
    #[error("method does not match: expected {expected}, actual {actual}")]
    MethodMismatch { expected: String, actual: String },
    #[error("request doesn't have header {0}")]
    HeaderMissing(String),
    #[error("{header} header value {actual} doesn't match expected {expected}")]
    HeaderValue {
        header: String,
        actual: String,
        expected: String,
    },
    #[error("{header} header value {actual} doesn't match regexp {pattern}")]
    HeaderRegex {
        header: String,
        actual: String,
        pattern: String,
    },
    #[error("'{0}' parameter is missing in query")]
    QueryKeyMissing(String),
    #[error("'{key}' parameters are not equal.\n Got: {actual:?} \n Want: {expected:?}")]
    QueryMismatch {
        key: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    #[error("'{key}' parameter has a malformed regexp: {reason}")]
    QueryRegex { key: String, reason: String },
    #[error("url path {actual} doesn't match expected {expected}")]
    PathMismatch { actual: String, expected: String },
    #[error("url path {actual} doesn't match regexp {pattern}")]
    PathRegex { actual: String, pattern: String },
    #[error("body value\n{actual}\ndoesn't match expected\n{expected}")]
    BodyMismatch { actual: String, expected: String },
    #[error("body value\n{actual}\ndoesn't match regexp {pattern}")]
    BodyRegex { actual: String, pattern: String },
}

/// A failure observed while serving requests or closing a running context.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MockError {
    #[error("request constraint {kind} failed: {violation}, request was:\n {request}")]
    Constraint {
        kind: &'static str,
        violation: ConstraintViolation,
        request: String,
    },
    #[error("at path {path}: number of calls does not match: expected {expected}, actual {actual}")]
    CallCount {
        path: String,
        expected: usize,
        actual: usize,
    },
    #[error("unhandled request to mock:\n{request}")]
    Unhandled { request: String },
    #[error("template mock error: {0}")]
    Template(String),
    #[error("at path {path}: reply strategy undefined")]
    MissingStrategy { path: String },
}

impl MockError {
    pub(crate) fn unhandled(request: &super::request::MockRequest) -> Self {
        MockError::Unhandled {
            request: request.dump(),
        }
    }
}

/// A `MockError` attributed to the service mock that produced it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("mock {service}: {error}")]
pub struct ServiceError {
    pub service: String,
    #[source]
    pub error: MockError,
}

/// A configuration node that could not be turned into a definition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("service mock not defined: {0}")]
    UnknownService(String),
    #[error("unable to load definition for {service}: {source}")]
    Service {
        service: String,
        #[source]
        source: Box<LoadError>,
    },
    #[error("at path {path}: unknown strategy: {name}")]
    UnknownStrategy { path: String, name: String },
    #[error("at path {path}: unknown constraint: {kind}")]
    UnknownConstraint { path: String, kind: String },
    #[error("at path {path}: unexpected key {key} (expecting {allowed:?})")]
    UnexpectedKey {
        path: String,
        key: String,
        allowed: Vec<&'static str>,
    },
    #[error("at path {path}: {reason}")]
    Invalid { path: String, reason: String },
}

impl LoadError {
    pub(crate) fn invalid(path: &str, reason: impl Into<String>) -> Self {
        LoadError::Invalid {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Listener lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind mock {service} to {addr}: {source}")]
    Bind {
        service: String,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("mock server {0} is not started")]
    NotStarted(String),
    #[error("mock server {0} is already started")]
    AlreadyStarted(String),
    #[error("mock server {0} did not shut down before the deadline")]
    ShutdownTimeout(String),
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ServerError>),
}
