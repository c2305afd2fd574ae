//! Mustache-style text rendering used by `@template` and request path
//! templates. `{{name}}` is HTML-escaped unless escaping is off,
//! `{{{name}}}` and `{{&name}}` are raw, and missing values render empty.

use serde_json::Value;

use crate::path;

pub fn render(template: &str, root: &Value, escape: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tag = &rest[start..];
        let (open, close) = if tag.starts_with("{{{") {
            (3, "}}}")
        } else {
            (2, "}}")
        };

        let Some(end) = tag[open..].find(close) else {
            out.push_str(tag);
            return out;
        };

        let mut name = tag[open..open + end].trim();
        let mut raw = open == 3 || !escape;
        if let Some(stripped) = name.strip_prefix('&') {
            name = stripped.trim();
            raw = true;
        }

        let text = path::lookup(root, name).map(stringify).unwrap_or_default();
        if raw {
            out.push_str(&text);
        } else {
            out.push_str(&escape_html(&text));
        }
        rest = &tag[open + end + close.len()..];
    }

    out.push_str(rest);
    out
}

/// Names referenced by the template's tags, in order of appearance.
pub fn tag_names(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let tag = &rest[start..];
        let (open, close) = if tag.starts_with("{{{") {
            (3, "}}}")
        } else {
            (2, "}}")
        };
        let Some(end) = tag[open..].find(close) else {
            break;
        };
        let name = tag[open..open + end].trim();
        names.push(name.strip_prefix('&').map(str::trim).unwrap_or(name));
        rest = &tag[open + end + close.len()..];
    }
    names
}

pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '/' => out.push_str("&#x2F;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            c => out.push(c),
        }
    }
    out
}
