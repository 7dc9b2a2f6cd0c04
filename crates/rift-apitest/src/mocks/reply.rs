//! Reply strategies: how a matched definition answers a request.
//!
//! Terminal strategies write a response directly. Dispatching strategies pick a
//! child definition and delegate, and forward running-context resets and checks to
//! every child.

use super::definition::Definition;
use super::error::MockError;
use super::request::{MockRequest, MockResponse};
use super::template::TemplateReply;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, warn};

/// A fixed response.
#[derive(Debug, Clone)]
pub struct ConstantReply {
    pub body: Bytes,
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

impl ConstantReply {
    pub fn new(
        body: impl Into<Bytes>,
        status: StatusCode,
        headers: Vec<(HeaderName, HeaderValue)>,
    ) -> Self {
        Self {
            body: body.into(),
            status,
            headers,
        }
    }

    /// Read the body from disk once, at construction.
    pub fn from_file(
        filename: impl AsRef<Path>,
        status: StatusCode,
        headers: Vec<(HeaderName, HeaderValue)>,
    ) -> std::io::Result<Self> {
        let body = std::fs::read(filename)?;
        Ok(Self::new(body, status, headers))
    }

    fn handle_request(&self, response: &mut MockResponse) {
        response.append_headers(&self.headers);
        response.write(self.status, self.body.clone());
    }
}

/// A child definition reached through a fixed URL path.
#[derive(Debug)]
pub struct UriVariant {
    pub path: String,
    pub definition: Definition,
}

/// How a definition produces its response.
#[derive(Debug)]
pub enum ReplyStrategy {
    /// 204 with no body.
    Nop,
    Constant(ConstantReply),
    Template(TemplateReply),
    UriVary(Vec<UriVariant>),
    MethodVary(Vec<(String, Definition)>),
    Sequence {
        steps: Vec<Definition>,
        position: Mutex<usize>,
    },
    BasedOnRequest {
        variants: Vec<Definition>,
        lock: Mutex<()>,
    },
    /// Abort the connection without answering.
    DropRequest,
}

impl ReplyStrategy {
    /// Dispatch by URL path. Each child answers `<base_path>/<uri>`, with duplicate
    /// slashes at the joint removed.
    pub fn uri_vary(base_path: &str, variants: Vec<(String, Definition)>) -> Self {
        let base = format!("{}/", base_path.trim_end_matches('/'));
        ReplyStrategy::UriVary(
            variants
                .into_iter()
                .map(|(uri, definition)| UriVariant {
                    path: format!("{base}{}", uri.trim_start_matches('/')),
                    definition,
                })
                .collect(),
        )
    }

    pub fn method_vary(variants: Vec<(String, Definition)>) -> Self {
        ReplyStrategy::MethodVary(variants)
    }

    pub fn sequence(steps: Vec<Definition>) -> Self {
        ReplyStrategy::Sequence {
            steps,
            position: Mutex::new(0),
        }
    }

    pub fn based_on_request(variants: Vec<Definition>) -> Self {
        ReplyStrategy::BasedOnRequest {
            variants,
            lock: Mutex::new(()),
        }
    }

    pub fn handle_request(
        &self,
        response: &mut MockResponse,
        request: &MockRequest,
    ) -> Vec<MockError> {
        match self {
            ReplyStrategy::Nop => {
                response.write(StatusCode::NO_CONTENT, Bytes::new());
                Vec::new()
            }
            ReplyStrategy::Constant(reply) => {
                reply.handle_request(response);
                Vec::new()
            }
            ReplyStrategy::Template(reply) => reply.handle_request(response, request),
            ReplyStrategy::UriVary(variants) => {
                let path = request.decoded_path();
                match variants.iter().find(|v| v.path == *path) {
                    Some(variant) => {
                        debug!("uriVary dispatch to {}", variant.path);
                        variant.definition.execute(response, request)
                    }
                    None => unhandled(response, StatusCode::NOT_FOUND, request),
                }
            }
            ReplyStrategy::MethodVary(variants) => {
                let method = request.method.as_str();
                match variants
                    .iter()
                    .find(|(m, _)| m.eq_ignore_ascii_case(method))
                {
                    Some((m, definition)) => {
                        debug!("methodVary dispatch to {}", m);
                        definition.execute(response, request)
                    }
                    None => unhandled(response, StatusCode::METHOD_NOT_ALLOWED, request),
                }
            }
            ReplyStrategy::Sequence { steps, position } => {
                let mut position = position.lock();
                match steps.get(*position) {
                    Some(step) => {
                        debug!("sequence step {}", *position);
                        *position += 1;
                        step.execute(response, request)
                    }
                    None => unhandled(response, StatusCode::NOT_FOUND, request),
                }
            }
            ReplyStrategy::BasedOnRequest { variants, lock } => {
                let _guard = lock.lock();
                let mut errors = Vec::new();
                for (i, variant) in variants.iter().enumerate() {
                    let violations = variant.verify(request);
                    if violations.is_empty() {
                        debug!("basedOnRequest dispatch to variant {}", i);
                        return variant.execute_without_verifying(response, request);
                    }
                    errors.extend(violations);
                }
                errors.extend(unhandled(response, StatusCode::NOT_FOUND, request));
                errors
            }
            ReplyStrategy::DropRequest => {
                response.drop_connection = true;
                Vec::new()
            }
        }
    }

    pub fn reset_running_context(&self) {
        match self {
            ReplyStrategy::UriVary(variants) => {
                variants
                    .iter()
                    .for_each(|v| v.definition.reset_running_context());
            }
            ReplyStrategy::MethodVary(variants) => {
                variants.iter().for_each(|(_, d)| d.reset_running_context());
            }
            ReplyStrategy::Sequence { steps, position } => {
                *position.lock() = 0;
                steps.iter().for_each(Definition::reset_running_context);
            }
            ReplyStrategy::BasedOnRequest { variants, .. } => {
                variants.iter().for_each(Definition::reset_running_context);
            }
            ReplyStrategy::Nop
            | ReplyStrategy::Constant(_)
            | ReplyStrategy::Template(_)
            | ReplyStrategy::DropRequest => {}
        }
    }

    pub fn end_running_context(&self) -> Vec<MockError> {
        match self {
            ReplyStrategy::UriVary(variants) => variants
                .iter()
                .flat_map(|v| v.definition.end_running_context())
                .collect(),
            ReplyStrategy::MethodVary(variants) => variants
                .iter()
                .flat_map(|(_, d)| d.end_running_context())
                .collect(),
            ReplyStrategy::Sequence { steps, .. } => steps
                .iter()
                .flat_map(Definition::end_running_context)
                .collect(),
            ReplyStrategy::BasedOnRequest { variants, .. } => variants
                .iter()
                .flat_map(Definition::end_running_context)
                .collect(),
            ReplyStrategy::Nop
            | ReplyStrategy::Constant(_)
            | ReplyStrategy::Template(_)
            | ReplyStrategy::DropRequest => Vec::new(),
        }
    }
}

fn unhandled(response: &mut MockResponse, status: StatusCode, request: &MockRequest) -> Vec<MockError> {
    warn!(
        "No variant matches {} {}, answering {}",
        request.method,
        request.path(),
        status.as_u16()
    );
    response.write(status, Bytes::new());
    vec![MockError::unhandled(request)]
}
