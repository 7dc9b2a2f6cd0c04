//! XML body decoding into the comparator's value tree.
//!
//! An element becomes:
//! - its text content, when it has neither attributes nor child elements
//! - `{"-attrs": {..}, "content": text}`, when it has attributes only
//! - a map of its child elements grouped by name (plus `"-attrs"` when present)
//!
//! A child name that occurs once maps to its node, repeated names map to an array
//! of nodes in document order.

use serde_json::{Map, Value};
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Element};
use sxd_document::QName;

const ATTRS_KEY: &str = "-attrs";
const CONTENT_KEY: &str = "content";

#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("invalid XML: {0}")]
    Syntax(String),
    #[error("XML document has no root element")]
    NoRoot,
}

/// Decode an XML document into a value tree rooted at `{<root-name>: node}`.
pub fn parse(raw: &str) -> Result<Value, XmlError> {
    let package =
        sxd_document::parser::parse(raw).map_err(|e| XmlError::Syntax(format!("{e:?}")))?;
    let document = package.as_document();

    let root = document
        .root()
        .children()
        .into_iter()
        .find_map(|child| match child {
            ChildOfRoot::Element(element) => Some(element),
            _ => None,
        })
        .ok_or(XmlError::NoRoot)?;

    Ok(Value::Object(build_map(&[root])))
}

fn build_map(elements: &[Element<'_>]) -> Map<String, Value> {
    let mut groups: Vec<(String, Vec<Element<'_>>)> = Vec::new();
    for element in elements {
        let name = join_name(element.name());
        match groups.iter_mut().find(|(n, _)| *n == name) {
            Some((_, group)) => group.push(*element),
            None => groups.push((name, vec![*element])),
        }
    }

    let mut result = Map::new();
    for (name, group) in groups {
        let value = if group.len() == 1 {
            build_node(&group[0])
        } else {
            Value::Array(group.iter().map(build_node).collect())
        };
        result.insert(name, value);
    }
    result
}

fn build_node(element: &Element<'_>) -> Value {
    let mut children = Vec::new();
    let mut content = String::new();
    for child in element.children() {
        match child {
            ChildOfElement::Element(e) => children.push(e),
            ChildOfElement::Text(t) => content.push_str(t.text()),
            _ => {}
        }
    }

    let attributes = element.attributes();
    let attrs = (!attributes.is_empty()).then(|| {
        attributes
            .iter()
            .map(|a| (join_name(a.name()), Value::String(a.value().to_string())))
            .collect::<Map<String, Value>>()
    });

    match (attrs, children.is_empty()) {
        (Some(attrs), false) => {
            let mut result = build_map(&children);
            result.insert(ATTRS_KEY.to_string(), Value::Object(attrs));
            Value::Object(result)
        }
        (Some(attrs), true) => {
            let mut result = Map::new();
            result.insert(ATTRS_KEY.to_string(), Value::Object(attrs));
            result.insert(CONTENT_KEY.to_string(), Value::String(content));
            Value::Object(result)
        }
        (None, false) => Value::Object(build_map(&children)),
        (None, true) => Value::String(content),
    }
}

fn join_name(name: QName<'_>) -> String {
    match name.namespace_uri() {
        Some(space) if !space.is_empty() => format!("{space}:{}", name.local_part()),
        _ => name.local_part().to_string(),
    }
}
