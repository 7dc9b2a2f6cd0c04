//! Templated replies rendered with Handlebars.
//!
//! The template is compiled when the definition is loaded. Each request is exposed to
//! the template as `request.{method, path, query, headers, body, json}`; `json` is
//! only decoded when the template source references `request.json`, and a body that
//! is not JSON then fails the reply.

use super::error::MockError;
use super::request::{MockRequest, MockResponse};
use handlebars::Handlebars;
use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;
use serde_json::{json, Map, Value};
use tracing::warn;

const TEMPLATE_NAME: &str = "reply";
const JSON_BODY_REFERENCE: &str = "request.json";

/// Why a template could not produce a body for a request.
#[derive(Debug, thiserror::Error)]
pub enum TemplateRenderError {
    #[error("failed to parse request as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Render(#[from] handlebars::RenderError),
}

/// A reply whose body is rendered per request.
pub struct TemplateReply {
    registry: Handlebars<'static>,
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    decode_json: bool,
}

impl std::fmt::Debug for TemplateReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateReply")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl TemplateReply {
    pub fn new(
        body: &str,
        status: StatusCode,
        headers: Vec<(HeaderName, HeaderValue)>,
    ) -> Result<Self, handlebars::TemplateError> {
        let mut registry = Handlebars::new();
        registry.register_helper("query", Box::new(query_helper));
        registry.register_helper("json", Box::new(json_helper));
        registry.register_helper("default", Box::new(default_helper));
        registry.register_helper("upper", Box::new(upper_helper));
        registry.register_helper("lower", Box::new(lower_helper));
        // Replies are not HTML.
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_template_string(TEMPLATE_NAME, body)?;

        Ok(Self {
            registry,
            status,
            headers,
            decode_json: body.contains(JSON_BODY_REFERENCE),
        })
    }

    pub fn render(&self, request: &MockRequest) -> Result<String, TemplateRenderError> {
        let context = self.context(request)?;
        Ok(self.registry.render(TEMPLATE_NAME, &context)?)
    }

    pub fn handle_request(
        &self,
        response: &mut MockResponse,
        request: &MockRequest,
    ) -> Vec<MockError> {
        match self.render(request) {
            Ok(body) => {
                response.append_headers(&self.headers);
                response.write(self.status, body);
                Vec::new()
            }
            Err(e) => {
                warn!("Template render failed for {} {}: {}", request.method, request.path(), e);
                response.write(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
                vec![MockError::Template(e.to_string())]
            }
        }
    }

    fn context(&self, request: &MockRequest) -> Result<Value, serde_json::Error> {
        let mut query = Map::new();
        for (key, values) in request.query_values() {
            if let Some(first) = values.into_iter().next() {
                query.insert(key, Value::String(first));
            }
        }

        let mut headers = Map::new();
        for name in request.headers.keys() {
            if let Some(value) = request.header(name.as_str()) {
                headers.insert(name.as_str().to_string(), Value::String(value.to_string()));
            }
        }

        let body = request.body_text();
        let decoded = if self.decode_json {
            serde_json::from_str(&body)?
        } else {
            Value::Null
        };

        Ok(json!({
            "request": {
                "method": request.method.as_str(),
                "path": request.decoded_path(),
                "query": query,
                "headers": headers,
                "body": body,
                "json": decoded,
            }
        }))
    }
}

// {{query "name"}}: first value of a query parameter, empty when absent.
fn query_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    ctx: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let name = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    if let Some(value) = ctx
        .data()
        .pointer("/request/query")
        .and_then(|q| q.get(name))
        .and_then(Value::as_str)
    {
        out.write(value)?;
    }
    Ok(())
}

fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value().clone()).unwrap_or(Value::Null);
    out.write(&value.to_string())?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let fallback = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");
    match value {
        Some(Value::String(s)) if !s.is_empty() => out.write(s)?,
        Some(Value::Null) | Some(Value::String(_)) | None => out.write(fallback)?,
        Some(other) => out.write(&other.to_string())?,
    }
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let param = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&param.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let param = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&param.to_lowercase())?;
    Ok(())
}
