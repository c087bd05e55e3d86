//! Variable reference resolution for node configuration.
//!
//! String leaves of a node's configuration may reference earlier results
//! with `{{ $node.<id>.<path> }}`. The path is looked up in the node's result
//! object `{"data": …, "port": …}` and may index arrays either as `.0` or `[0]`.
//!
//! A template that makes up the whole string (surrounding whitespace allowed)
//! is replaced by the referenced value with its JSON type intact. Templates
//! embedded in a longer string are rendered as text: strings verbatim, other
//! values as compact JSON. Object keys are never rewritten, and `{{ … }}`
//! text that is not a `$node` reference is left as written.

use crate::definition::NodeId;
use crate::error::ResolveError;
use crate::execution::NodeResult;
use regex_lite::Regex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::LazyLock;

const NODE_PREFIX: &str = "$node.";

static FULL_TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\{\{\s*([^{}]+?)\s*\}\}\s*$").expect("full template pattern is valid")
});

static EMBEDDED_TEMPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(.+?)\s*\}\}").expect("embedded template pattern is valid")
});

/// Resolves every reference in `value` against `results`.
///
/// # Errors
///
/// Returns the first reference naming a node without a result, a path that
/// does not exist, or a `$node` reference without a node id.
pub fn resolve(
    value: &JsonValue,
    results: &HashMap<NodeId, NodeResult>,
) -> Result<JsonValue, ResolveError> {
    match value {
        JsonValue::String(s) => resolve_string(s, results),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| resolve(item, results))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        JsonValue::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve(item, results)?);
            }
            Ok(JsonValue::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    template: &str,
    results: &HashMap<NodeId, NodeResult>,
) -> Result<JsonValue, ResolveError> {
    if !template.contains("{{") {
        return Ok(JsonValue::String(template.to_string()));
    }

    if let Some(expr) = FULL_TEMPLATE
        .captures(template)
        .and_then(|captures| captures.get(1))
        .filter(|expr| is_node_reference(expr.as_str()))
    {
        return resolve_expression(expr.as_str(), results);
    }

    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for captures in EMBEDDED_TEMPLATE.captures_iter(template) {
        let (Some(whole), Some(expr)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        rendered.push_str(&template[last..whole.start()]);
        if !is_node_reference(expr.as_str()) {
            rendered.push_str(whole.as_str());
            last = whole.end();
            continue;
        }
        match resolve_expression(expr.as_str(), results)? {
            JsonValue::String(s) => rendered.push_str(&s),
            other => rendered.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    rendered.push_str(&template[last..]);

    Ok(JsonValue::String(rendered))
}

fn is_node_reference(expr: &str) -> bool {
    expr.trim().starts_with(NODE_PREFIX)
}

fn resolve_expression(
    expr: &str,
    results: &HashMap<NodeId, NodeResult>,
) -> Result<JsonValue, ResolveError> {
    let malformed = || ResolveError::Malformed {
        expression: expr.to_string(),
    };

    let rest = expr.trim().strip_prefix(NODE_PREFIX).ok_or_else(malformed)?;
    let id_end = rest.find(['.', '[']).unwrap_or(rest.len());
    let (id, path) = rest.split_at(id_end);
    if id.is_empty() {
        return Err(malformed());
    }

    let node_id = NodeId::from(id);
    let result = results
        .get(&node_id)
        .ok_or_else(|| ResolveError::MissingNode {
            node_id: node_id.clone(),
        })?;

    let path = path.strip_prefix('.').unwrap_or(path);
    let segments = split_path(path).ok_or_else(malformed)?;
    let root = result.to_json();

    let mut current = &root;
    for segment in &segments {
        let next = match current {
            JsonValue::Object(map) => map.get(segment.as_str()),
            JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| ResolveError::MissingPath {
            node_id: node_id.clone(),
            path: path.to_string(),
            segment: segment.clone(),
        })?;
    }

    Ok(current.clone())
}

/// Splits `data.items[0].name` into `["data", "items", "0", "name"]`.
fn split_path(path: &str) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        let (head, mut indices) = match part.find('[') {
            Some(pos) => part.split_at(pos),
            None => (part, ""),
        };
        if !head.is_empty() {
            segments.push(head.to_string());
        }
        while !indices.is_empty() {
            let inner = indices.strip_prefix('[')?;
            let close = inner.find(']')?;
            let index = inner[..close].trim();
            if index.is_empty() {
                return None;
            }
            segments.push(index.to_string());
            indices = &inner[close + 1..];
        }
    }
    Some(segments)
}
