//! Request and response model shared by verifiers and reply strategies.
//!
//! The request body is collected once when the request arrives, so every verifier
//! and strategy reads the complete body regardless of who read it before.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use std::borrow::Cow;
use std::collections::HashMap;

/// A fully buffered inbound request.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl MockRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            uri,
            headers,
            body: body.into(),
        }
    }

    /// Buffer a hyper request.
    pub async fn from_hyper(req: Request<Incoming>) -> Result<Self, hyper::Error> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();
        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        })
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Percent-decoded path, used for routing and path constraints. Falls back to the
    /// raw path when the escapes do not decode to UTF-8.
    pub fn decoded_path(&self) -> Cow<'_, str> {
        let raw = self.uri.path();
        urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
    }

    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or("")
    }

    /// First value of a header, if it is valid text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All query values grouped by key.
    pub fn query_values(&self) -> HashMap<String, Vec<String>> {
        parse_query_values(self.query())
    }

    /// Body as text (lossy).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Render the request in HTTP/1.1 wire form for error reports.
    pub fn dump(&self) -> String {
        let target = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, target);
        if let Some(host) = self.uri.authority() {
            if !self.headers.contains_key(hyper::header::HOST) {
                out.push_str(&format!("Host: {host}\r\n"));
            }
        }
        for (name, value) in &self.headers {
            out.push_str(&format!(
                "{}: {}\r\n",
                name,
                String::from_utf8_lossy(value.as_bytes())
            ));
        }
        out.push_str("\r\n");
        out.push_str(&self.body_text());
        out
    }
}

/// Parse an `application/x-www-form-urlencoded` string into grouped values.
///
/// A leading `?` is ignored and `+` decodes to a space.
pub fn parse_query_values(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    let query = query.strip_prefix('?').unwrap_or(query);
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(decode_component(key))
            .or_default()
            .push(decode_component(value));
    }
    params
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    match urlencoding::decode(&raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw,
    }
}

/// Response under construction by a reply strategy.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Abort the connection instead of answering.
    pub drop_connection: bool,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            drop_connection: false,
        }
    }
}

impl MockResponse {
    /// Append pre-validated headers.
    pub fn append_headers(&mut self, headers: &[(HeaderName, HeaderValue)]) {
        for (name, value) in headers {
            self.headers.append(name.clone(), value.clone());
        }
    }

    pub fn write(&mut self, status: StatusCode, body: impl Into<Bytes>) {
        self.status = status;
        self.body = body.into();
    }

    pub fn into_hyper(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_values_group_duplicates() {
        let values = parse_query_values("?a=1&b=2&a=3&name=hello%20world&sp=a+b&flag");
        assert_eq!(values["a"], vec!["1", "3"]);
        assert_eq!(values["b"], vec!["2"]);
        assert_eq!(values["name"], vec!["hello world"]);
        assert_eq!(values["sp"], vec!["a b"]);
        assert_eq!(values["flag"], vec![""]);
    }

    #[test]
    fn test_decoded_path() {
        let req = MockRequest::new(
            Method::GET,
            Uri::from_static("/api/john%20doe?x=%20"),
            HeaderMap::new(),
            "",
        );
        assert_eq!(req.path(), "/api/john%20doe");
        assert_eq!(req.decoded_path(), "/api/john doe");

        let invalid = MockRequest::new(Method::GET, Uri::from_static("/a%FF"), HeaderMap::new(), "");
        assert_eq!(invalid.decoded_path(), "/a%FF");
    }

    #[test]
    fn test_query_value_may_contain_question_mark() {
        let values = parse_query_values("?a=1&b=?&a=3");
        assert_eq!(values["b"], vec!["?"]);
        assert_eq!(values["a"], vec!["1", "3"]);
    }

    #[test]
    fn test_dump_contains_request_line_headers_and_body() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        let req = MockRequest::new(
            Method::POST,
            Uri::from_static("/orders?id=7"),
            headers,
            r#"{"a":1}"#,
        );
        let dump = req.dump();
        assert!(dump.starts_with("POST /orders?id=7 HTTP/1.1\r\n"));
        assert!(dump.contains("content-type: application/json\r\n"));
        assert!(dump.ends_with("\r\n\r\n{\"a\":1}"));
    }

    #[test]
    fn test_response_conversion() {
        let mut response = MockResponse::default();
        response.append_headers(&[(
            HeaderName::from_static("x-mock"),
            HeaderValue::from_static("1"),
        )]);
        response.write(StatusCode::CREATED, "done");
        let hyper_response = response.into_hyper();
        assert_eq!(hyper_response.status(), StatusCode::CREATED);
        assert_eq!(hyper_response.headers()["x-mock"], "1");
    }
}
