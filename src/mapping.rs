//! Field-mapping resolution: extracting bound parameter values from a
//! structured payload using caller-supplied path expressions.
//!
//! A path expression is a dot-separated chain of object keys with optional
//! array indices, e.g. `order.items[0].sku`. Resolution failures yield
//! `null` for that slot rather than aborting the request.

use serde_json::Value;

/// Parse the caller-supplied mapping definition into a list of path
/// expressions. The host hands mappings over either as a JSON array of
/// strings or as a string containing the serialized array.
///
/// Malformed definitions are reported once (here, at setup time) and
/// degrade to an empty list so the submitting flow keeps running.
pub fn parse_mappings(raw: Option<&Value>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let parsed = match raw {
        Value::String(s) if s.is_empty() => return Vec::new(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(error = %err, "error parsing mappings, using empty mapping list");
                return Vec::new();
            }
        },
        other => other.clone(),
    };
    match parsed {
        Value::Array(items) => {
            let mut paths = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(path) => paths.push(path),
                    other => {
                        tracing::error!(
                            entry = %other,
                            "mapping entry is not a string, using empty mapping list"
                        );
                        return Vec::new();
                    }
                }
            }
            paths
        }
        other => {
            tracing::error!(mappings = %other, "mappings is not an array, using empty mapping list");
            Vec::new()
        }
    }
}

/// Resolve a single path expression against a payload. Returns `None` when
/// any segment is missing, out of range, or applied to the wrong shape.
pub fn resolve_path(payload: &Value, path: &str) -> Option<Value> {
    let mut current = payload;
    for segment in parse_segments(path)? {
        current = match segment {
            Segment::Key(key) => current.as_object()?.get(key)?,
            Segment::Index(idx) => current.as_array()?.get(idx)?,
        };
    }
    Some(current.clone())
}

/// Build the ordered parameter list for a payload: one extracted value per
/// mapping, with failed resolutions contributing `null`.
pub fn resolve_values(payload: &Value, mappings: &[String]) -> Vec<Value> {
    mappings
        .iter()
        .map(|path| resolve_path(payload, path).unwrap_or(Value::Null))
        .collect()
}

enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

fn parse_segments(path: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let mut rest = part;
        // leading key before any bracket
        let key_end = rest.find('[').unwrap_or(rest.len());
        let key = &rest[..key_end];
        if !key.is_empty() {
            segments.push(Segment::Key(key));
        }
        rest = &rest[key_end..];
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']')?;
            let idx: usize = stripped[..close].parse().ok()?;
            segments.push(Segment::Index(idx));
            rest = &stripped[close + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}
