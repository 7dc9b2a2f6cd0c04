//! Build definition trees from configuration and install them into service mocks.
//!
//! The configuration is a generic value tree (decoded from YAML or JSON). Every node
//! is validated against a closed set of keys; an unknown key, strategy or
//! constraint kind is an error carrying the path of the offending node.

use super::constraint::RequestConstraint;
use super::definition::Definition;
use super::error::LoadError;
use super::registry::Mocks;
use super::reply::{ConstantReply, ReplyStrategy};
use super::template::TemplateReply;
use crate::compare::ComparisonOptions;
use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;
use serde_json::{Map, Value};
use tracing::debug;

const DEFINITION_KEYS: &[&str] = &["requestConstraints", "strategy", "calls"];
const COMPARISON_KEYS: &[&str] = &["ignoreValues", "ignoreArraysOrdering", "disallowExtraFields"];

/// Loads definitions into the service mocks of a registry.
pub struct Loader<'a> {
    mocks: &'a Mocks,
}

impl<'a> Loader<'a> {
    pub fn new(mocks: &'a Mocks) -> Self {
        Self { mocks }
    }

    /// Load `{service name: definition}` pairs.
    ///
    /// All definitions are built before any is installed, so a failure leaves every
    /// service mock with the definition it had before.
    pub fn load(&self, definitions: &Value) -> Result<(), LoadError> {
        let services = definitions
            .as_object()
            .ok_or_else(|| LoadError::invalid("$", "mocks must map service names to definitions"))?;

        let mut loaded = Vec::with_capacity(services.len());
        for (name, raw) in services {
            let service = self
                .mocks
                .service(name)
                .ok_or_else(|| LoadError::UnknownService(name.clone()))?;
            let definition = load_definition("$", raw).map_err(|e| LoadError::Service {
                service: name.clone(),
                source: Box::new(e),
            })?;
            loaded.push((service, definition));
        }

        for (service, definition) in loaded {
            debug!("Installing definition for mock {}", service.name());
            service.set_definition(definition);
        }
        Ok(())
    }

    /// Load definitions from a YAML (or JSON) document.
    pub fn load_yaml(&self, raw: &str) -> Result<(), LoadError> {
        let definitions: Value = serde_yaml::from_str(raw)
            .map_err(|e| LoadError::invalid("$", format!("invalid YAML: {e}")))?;
        self.load(&definitions)
    }
}

/// Build one definition node and its subtree.
pub fn load_definition(path: &str, raw: &Value) -> Result<Definition, LoadError> {
    let map = raw
        .as_object()
        .ok_or_else(|| LoadError::invalid(path, "definition must be key-values"))?;

    let strategy_name = map
        .get("strategy")
        .and_then(Value::as_str)
        .ok_or_else(|| LoadError::invalid(path, "requires `strategy` key on root level"))?;
    let strategy_keys = strategy_keys(strategy_name).ok_or_else(|| LoadError::UnknownStrategy {
        path: path.to_string(),
        name: strategy_name.to_string(),
    })?;
    let allowed: Vec<&'static str> = DEFINITION_KEYS
        .iter()
        .chain(strategy_keys)
        .copied()
        .collect();
    check_keys(path, map, &allowed)?;

    let constraints = match map.get("requestConstraints") {
        None => Vec::new(),
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .enumerate()
            .map(|(i, c)| load_constraint(&format!("{path}.requestConstraints[{i}]"), c))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(LoadError::invalid(
                path,
                "`requestConstraints` requires a non-empty array",
            ))
        }
    };

    let calls = match map.get("calls") {
        None => None,
        Some(value) => Some(
            value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| LoadError::invalid(path, "`calls` must be a non-negative integer"))?,
        ),
    };

    let strategy_path = format!("{path}.{strategy_name}");
    let strategy = load_strategy(&strategy_path, strategy_name, map)?;

    Ok(Definition::new(path, constraints, Some(strategy), calls))
}

fn strategy_keys(name: &str) -> Option<&'static [&'static str]> {
    let keys: &'static [&'static str] = match name {
        "nop" | "dropRequest" => &[],
        "uriVary" | "basedOnRequest" => &["basePath", "uris"],
        "methodVary" => &["methods"],
        "file" => &["filename", "statusCode", "headers"],
        "constant" | "template" => &["body", "statusCode", "headers"],
        "sequence" => &["sequence"],
        _ => return None,
    };
    Some(keys)
}

fn load_strategy(
    path: &str,
    name: &str,
    map: &Map<String, Value>,
) -> Result<ReplyStrategy, LoadError> {
    match name {
        "nop" => Ok(ReplyStrategy::Nop),
        "dropRequest" => Ok(ReplyStrategy::DropRequest),
        "constant" => {
            let body = required_str(path, map, "body")?;
            Ok(ReplyStrategy::Constant(ConstantReply::new(
                body.to_string(),
                status_code(path, map)?,
                headers(path, map)?,
            )))
        }
        "file" => {
            let filename = required_str(path, map, "filename")?;
            let reply = ConstantReply::from_file(filename, status_code(path, map)?, headers(path, map)?)
                .map_err(|e| LoadError::invalid(path, format!("unable to read {filename}: {e}")))?;
            Ok(ReplyStrategy::Constant(reply))
        }
        "template" => {
            let body = required_str(path, map, "body")?;
            let reply = TemplateReply::new(body, status_code(path, map)?, headers(path, map)?)
                .map_err(|e| LoadError::invalid(path, format!("template syntax error: {e}")))?;
            Ok(ReplyStrategy::Template(reply))
        }
        "uriVary" => {
            let base_path = optional_str(path, map, "basePath")?.unwrap_or("");
            let uris = child_map(path, map, "uris")?;
            Ok(ReplyStrategy::uri_vary(base_path, uris))
        }
        "methodVary" => Ok(ReplyStrategy::method_vary(child_map(path, map, "methods")?)),
        "sequence" => {
            let steps = match map.get("sequence") {
                Some(Value::Array(items)) => child_list(path, items)?,
                Some(_) => return Err(LoadError::invalid(path, "`sequence` must be a list")),
                None => return Err(LoadError::invalid(path, "`sequence` requires `sequence` key")),
            };
            Ok(ReplyStrategy::sequence(steps))
        }
        "basedOnRequest" => {
            let variants = match map.get("uris") {
                None => Vec::new(),
                Some(Value::Array(items)) => child_list(path, items)?,
                Some(_) => {
                    return Err(LoadError::invalid(
                        path,
                        "`basedOnRequest` requires list under `uris` key",
                    ))
                }
            };
            Ok(ReplyStrategy::based_on_request(variants))
        }
        other => Err(LoadError::UnknownStrategy {
            path: path.to_string(),
            name: other.to_string(),
        }),
    }
}

fn child_map(
    path: &str,
    map: &Map<String, Value>,
    key: &str,
) -> Result<Vec<(String, Definition)>, LoadError> {
    match map.get(key) {
        None => Ok(Vec::new()),
        Some(Value::Object(children)) => children
            .iter()
            .map(|(name, raw)| {
                load_definition(&format!("{path}.{name}"), raw).map(|d| (name.clone(), d))
            })
            .collect(),
        Some(_) => Err(LoadError::invalid(path, format!("`{key}` must be a map"))),
    }
}

fn child_list(path: &str, items: &[Value]) -> Result<Vec<Definition>, LoadError> {
    items
        .iter()
        .enumerate()
        .map(|(i, raw)| load_definition(&format!("{path}.{i}"), raw))
        .collect()
}

fn status_code(path: &str, map: &Map<String, Value>) -> Result<StatusCode, LoadError> {
    let Some(raw) = map.get("statusCode") else {
        return Ok(StatusCode::OK);
    };
    raw.as_u64()
        .and_then(|code| u16::try_from(code).ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| LoadError::invalid(path, format!("invalid `statusCode`: {raw}")))
}

fn headers(
    path: &str,
    map: &Map<String, Value>,
) -> Result<Vec<(HeaderName, HeaderValue)>, LoadError> {
    let Some(raw) = map.get("headers") else {
        return Ok(Vec::new());
    };
    let entries = raw
        .as_object()
        .ok_or_else(|| LoadError::invalid(path, "`headers` must be a map"))?;

    entries
        .iter()
        .map(|(name, value)| {
            let value = value
                .as_str()
                .ok_or_else(|| LoadError::invalid(path, "`headers` requires string values"))?;
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| LoadError::invalid(path, format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| LoadError::invalid(path, format!("invalid value for header {name}: {e}")))?;
            Ok((name, value))
        })
        .collect()
}

fn constraint_keys(kind: &str) -> Option<&'static [&'static str]> {
    let keys: &'static [&'static str] = match kind {
        "nop" | "methodIsGET" | "methodIsPOST" => &[],
        "bodyMatchesJSON" | "bodyMatchesXML" => &["body", "comparisonParams"],
        "bodyJSONFieldMatchesJSON" => &["path", "value", "comparisonParams"],
        "queryMatches" | "queryMatchesRegexp" => &["expectedQuery"],
        "methodIs" => &["method"],
        "headerIs" => &["header", "value", "regexp"],
        "bodyMatchesText" => &["body", "regexp"],
        "pathMatches" => &["path", "regexp"],
        _ => return None,
    };
    Some(keys)
}

/// Build one request constraint.
pub fn load_constraint(path: &str, raw: &Value) -> Result<RequestConstraint, LoadError> {
    let map = raw
        .as_object()
        .ok_or_else(|| LoadError::invalid(path, "constraint must be a map"))?;
    let kind = required_str(path, map, "kind")?;
    let keys = constraint_keys(kind).ok_or_else(|| LoadError::UnknownConstraint {
        path: path.to_string(),
        kind: kind.to_string(),
    })?;
    let allowed: Vec<&'static str> = std::iter::once("kind").chain(keys.iter().copied()).collect();
    check_keys(path, map, &allowed)?;

    let build_error = |e: super::constraint::ConstraintBuildError| LoadError::invalid(path, e.to_string());
    let constraint = match kind {
        "nop" => RequestConstraint::Nop,
        "bodyMatchesJSON" => RequestConstraint::body_matches_json(
            required_str(path, map, "body")?,
            comparison_params(path, map)?,
        )
        .map_err(build_error)?,
        "bodyMatchesXML" => RequestConstraint::body_matches_xml(
            required_str(path, map, "body")?,
            comparison_params(path, map)?,
        )
        .map_err(build_error)?,
        "bodyJSONFieldMatchesJSON" => RequestConstraint::body_json_field_matches_json(
            required_str(path, map, "path")?,
            required_str(path, map, "value")?,
            comparison_params(path, map)?,
        )
        .map_err(build_error)?,
        "queryMatches" => {
            RequestConstraint::query_matches(required_str(path, map, "expectedQuery")?)
        }
        "queryMatchesRegexp" => {
            RequestConstraint::query_matches_regexp(required_str(path, map, "expectedQuery")?)
        }
        "methodIsGET" => RequestConstraint::method_is("GET"),
        "methodIsPOST" => RequestConstraint::method_is("POST"),
        "methodIs" => RequestConstraint::method_is(non_empty_str(path, map, "method")?),
        "headerIs" => RequestConstraint::header_is(
            non_empty_str(path, map, "header")?,
            optional_str(path, map, "value")?.unwrap_or(""),
            optional_non_empty_str(path, map, "regexp")?.unwrap_or(""),
        )
        .map_err(build_error)?,
        "bodyMatchesText" => RequestConstraint::body_matches_text(
            optional_str(path, map, "body")?.unwrap_or(""),
            optional_str(path, map, "regexp")?.unwrap_or(""),
        )
        .map_err(build_error)?,
        "pathMatches" => RequestConstraint::path_matches(
            optional_str(path, map, "path")?.unwrap_or(""),
            optional_non_empty_str(path, map, "regexp")?.unwrap_or(""),
        )
        .map_err(build_error)?,
        other => {
            return Err(LoadError::UnknownConstraint {
                path: path.to_string(),
                kind: other.to_string(),
            })
        }
    };
    Ok(constraint)
}

/// `comparisonParams`; array order is ignored unless switched off.
fn comparison_params(path: &str, map: &Map<String, Value>) -> Result<ComparisonOptions, LoadError> {
    let mut options = ComparisonOptions::unordered_arrays();
    let Some(raw) = map.get("comparisonParams") else {
        return Ok(options);
    };

    let params_path = format!("{path}.comparisonParams");
    let params = raw
        .as_object()
        .ok_or_else(|| LoadError::invalid(&params_path, "`comparisonParams` can't be parsed"))?;
    check_keys(&params_path, params, COMPARISON_KEYS)?;

    for (key, value) in params {
        let flag = value.as_bool().ok_or_else(|| {
            LoadError::invalid(&params_path, format!("`{key}` must be a boolean"))
        })?;
        match key.as_str() {
            "ignoreValues" => options.ignore_values = flag,
            "ignoreArraysOrdering" => options.ignore_array_order = flag,
            "disallowExtraFields" => options.disallow_extra_fields = flag,
            _ => {}
        }
    }
    Ok(options)
}

fn check_keys(path: &str, map: &Map<String, Value>, allowed: &[&'static str]) -> Result<(), LoadError> {
    match map.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(LoadError::UnexpectedKey {
            path: path.to_string(),
            key: key.clone(),
            allowed: allowed.to_vec(),
        }),
        None => Ok(()),
    }
}

fn required_str<'v>(path: &str, map: &'v Map<String, Value>, key: &str) -> Result<&'v str, LoadError> {
    optional_str(path, map, key)?
        .ok_or_else(|| LoadError::invalid(path, format!("requires `{key}` key")))
}

fn non_empty_str<'v>(path: &str, map: &'v Map<String, Value>, key: &str) -> Result<&'v str, LoadError> {
    optional_non_empty_str(path, map, key)?
        .ok_or_else(|| LoadError::invalid(path, format!("requires `{key}` key")))
}

fn optional_str<'v>(
    path: &str,
    map: &'v Map<String, Value>,
    key: &str,
) -> Result<Option<&'v str>, LoadError> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(LoadError::invalid(path, format!("`{key}` must be string"))),
    }
}

fn optional_non_empty_str<'v>(
    path: &str,
    map: &'v Map<String, Value>,
    key: &str,
) -> Result<Option<&'v str>, LoadError> {
    match optional_str(path, map, key)? {
        Some("") => Err(LoadError::invalid(path, format!("`{key}` must not be empty"))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::request::MockRequest;
    use hyper::{HeaderMap, Method, Uri};
    use serde_json::json;

    fn request(method: Method, uri: &'static str, body: &'static str) -> MockRequest {
        MockRequest::new(method, Uri::from_static(uri), HeaderMap::new(), body)
    }

    fn unwrap_service_error(err: LoadError) -> LoadError {
        match err {
            LoadError::Service { source, .. } => *source,
            other => panic!("expected a service error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_nested_tree() {
        let mocks = Mocks::new_nop(["orders"]);
        Loader::new(&mocks)
            .load_yaml(
                r#"
orders:
  strategy: uriVary
  basePath: /api
  uris:
    /items:
      strategy: methodVary
      methods:
        GET:
          strategy: constant
          body: '{"items": []}'
          headers:
            Content-Type: application/json
        post:
          requestConstraints:
            - kind: bodyMatchesJSON
              body: '{"name": "cake"}'
          strategy: constant
          statusCode: 201
          body: created
          calls: 1
"#,
            )
            .unwrap();

        let mock = mocks.service("orders").unwrap();
        let response = mock.serve(&request(Method::GET, "/api/items", ""));
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers["content-type"], "application/json");
        assert_eq!(response.body, r#"{"items": []}"#);

        let response = mock.serve(&request(Method::POST, "/api/items", r#"{"name": "cake"}"#));
        assert_eq!(response.status, StatusCode::CREATED);
        assert!(mock.end_running_context().is_empty());
    }

    #[test]
    fn test_child_paths_are_reported() {
        let mocks = Mocks::new_nop(["orders"]);
        mocks.reset_running_context();
        Loader::new(&mocks)
            .load(&json!({
                "orders": {
                    "strategy": "uriVary",
                    "basePath": "/api",
                    "uris": {"/a": {"strategy": "nop", "calls": 1}}
                }
            }))
            .unwrap();
        let errors = mocks.end_running_context();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "mock orders: at path $.uriVary./a: number of calls does not match: expected 1, actual 0"
        );
    }

    #[test]
    fn test_unknown_service() {
        let mocks = Mocks::new_nop(["orders"]);
        let err = Loader::new(&mocks)
            .load(&json!({"billing": {"strategy": "nop"}}))
            .unwrap_err();
        assert_eq!(err, LoadError::UnknownService("billing".to_string()));
    }

    #[test]
    fn test_unknown_key_names_its_path() {
        let mocks = Mocks::new_nop(["orders"]);
        let err = Loader::new(&mocks)
            .load(&json!({
                "orders": {
                    "strategy": "uriVary",
                    "uris": {"/a": {"strategy": "constant", "body": "x", "bdy": "typo"}}
                }
            }))
            .unwrap_err();
        match unwrap_service_error(err) {
            LoadError::UnexpectedKey { path, key, .. } => {
                assert_eq!(path, "$.uriVary./a");
                assert_eq!(key, "bdy");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unknown_strategy_and_constraint() {
        let mocks = Mocks::new_nop(["orders"]);
        let loader = Loader::new(&mocks);

        let err = loader
            .load(&json!({"orders": {"strategy": "echo"}}))
            .unwrap_err();
        assert!(matches!(
            unwrap_service_error(err),
            LoadError::UnknownStrategy { name, .. } if name == "echo"
        ));

        let err = loader
            .load(&json!({"orders": {
                "strategy": "nop",
                "requestConstraints": [{"kind": "bodyIsCake"}]
            }}))
            .unwrap_err();
        assert!(matches!(
            unwrap_service_error(err),
            LoadError::UnknownConstraint { path, kind }
                if path == "$.requestConstraints[0]" && kind == "bodyIsCake"
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mocks = Mocks::new_nop(["orders"]);
        let loader = Loader::new(&mocks);
        let cases = [
            json!({"orders": "nop"}),
            json!({"orders": {"calls": 1}}),
            json!({"orders": {"strategy": "nop", "calls": -1}}),
            json!({"orders": {"strategy": "nop", "calls": "two"}}),
            json!({"orders": {"strategy": "constant", "body": "x", "statusCode": 1000}}),
            json!({"orders": {"strategy": "constant"}}),
            json!({"orders": {"strategy": "nop", "requestConstraints": []}}),
            json!({"orders": {"strategy": "template", "body": "{{#each request.query}}{{/if}}"}}),
            json!({"orders": {"strategy": "file", "filename": "/nonexistent/reply.json"}}),
            json!({"orders": {"strategy": "sequence", "sequence": {"a": 1}}}),
            json!({"orders": {"strategy": "nop", "requestConstraints": [{"kind": "methodIs", "method": ""}]}}),
            json!({"orders": {"strategy": "nop", "requestConstraints": [{"kind": "headerIs", "header": "x", "regexp": "(["}]}}),
            json!({"orders": {"strategy": "nop", "requestConstraints": [{"kind": "bodyMatchesJSON", "body": "{"}]}}),
        ];
        for case in cases {
            assert!(loader.load(&case).is_err(), "accepted {case}");
        }
    }

    #[test]
    fn test_comparison_params() {
        let path = "$.requestConstraints[0]";
        let defaults = comparison_params(path, &Map::new()).unwrap();
        assert!(defaults.ignore_array_order);
        assert!(!defaults.ignore_values);

        let raw = json!({"comparisonParams": {"ignoreArraysOrdering": false, "disallowExtraFields": true}});
        let options = comparison_params(path, raw.as_object().unwrap()).unwrap();
        assert!(!options.ignore_array_order);
        assert!(options.disallow_extra_fields);

        let raw = json!({"comparisonParams": {"ignoreOrder": true}});
        assert!(matches!(
            comparison_params(path, raw.as_object().unwrap()),
            Err(LoadError::UnexpectedKey { key, .. }) if key == "ignoreOrder"
        ));
    }

    #[test]
    fn test_failed_load_installs_nothing() {
        let mocks = Mocks::new_nop(["a", "b"]);
        let result = Loader::new(&mocks).load(&json!({
            "a": {"strategy": "constant", "body": "new"},
            "b": {"strategy": "bogus"}
        }));
        assert!(result.is_err());
        let response = mocks.service("a").unwrap().serve(&request(Method::GET, "/", ""));
        assert_eq!(response.status, StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_all_constraint_kinds_load() {
        let raw = json!([
            {"kind": "nop"},
            {"kind": "bodyMatchesJSON", "body": "{}"},
            {"kind": "bodyMatchesXML", "body": "<a/>"},
            {"kind": "bodyJSONFieldMatchesJSON", "path": "a.b", "value": "1"},
            {"kind": "bodyMatchesText", "body": "x", "regexp": "x"},
            {"kind": "pathMatches", "path": "/x"},
            {"kind": "methodIsGET"},
            {"kind": "methodIsPOST"},
            {"kind": "methodIs", "method": "PUT"},
            {"kind": "headerIs", "header": "x-token", "value": "1"},
            {"kind": "queryMatches", "expectedQuery": "a=1"},
            {"kind": "queryMatchesRegexp", "expectedQuery": "a=$matchRegexp(\\d)"}
        ]);
        for (i, item) in raw.as_array().unwrap().iter().enumerate() {
            let constraint = load_constraint(&format!("$.requestConstraints[{i}]"), item).unwrap();
            let expected_kind = match item["kind"].as_str().unwrap() {
                "methodIsGET" | "methodIsPOST" => "methodIs",
                kind => kind,
            };
            assert_eq!(constraint.kind(), expected_kind);
        }
    }
}
