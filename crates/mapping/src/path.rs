//! Dotted path addressing into event JSON (`$.properties.product_id`).
//!
//! The leading `$.` is optional and an empty path (or `$.`) addresses the
//! root. Segments may contain spaces. Numeric segments index arrays. Bracket
//! syntax is not supported and simply resolves to nothing.

use serde_json::{Map, Value};

fn segments(path: &str) -> Option<std::str::Split<'_, char>> {
    let trimmed = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.split('.'))
    }
}

pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let Some(mut parts) = segments(path) else {
        return Some(root);
    };
    parts.try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn lookup_in<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = map.get(head)?;
    match rest {
        Some(rest) => lookup(value, rest),
        None => Some(value),
    }
}

/// Writes `value` at `path`, creating intermediate objects. A non-object
/// found along the way is replaced.
pub fn set_in(map: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            map.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(inner) = child {
                set_in(inner, rest, value);
            }
        }
    }
}

pub fn remove_in(map: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => map.shift_remove(path),
        Some((head, rest)) => match map.get_mut(head) {
            Some(Value::Object(inner)) => remove_in(inner, rest),
            _ => None,
        },
    }
}

/// A value counts as set when present and not null, `""`, `[]` or `{}`.
pub fn is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

/// JSON type name as reported in validation messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
