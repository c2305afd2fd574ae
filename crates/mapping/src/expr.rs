//! Mapping expression language.
//!
//! Mappings are authored as JSON where a single-key object whose key starts
//! with `@` is a directive:
//!
//! | Directive | Form |
//! |-----------|------|
//! | `@path` | `{"@path": "$.properties.price"}` |
//! | `@literal` | `{"@literal": <any>}` |
//! | `@template` | `{"@template": "Hi {{traits.name}}"}` |
//! | `@if` | `{"@if": {"exists": <expr>, "then": <expr>, "else": <expr>}}` |
//! | `@arrayPath` | `{"@arrayPath": ["$.properties.products", {<template>}]}` |
//!
//! Everything else is plain JSON, evaluated element-wise. [`Expr::parse`]
//! turns the JSON into a closed AST once, and [`Expr::evaluate`] is the
//! single recursive evaluator.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::error::MappingError;
use crate::{path, template};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(String),
    Template(String),
    /// Selects `then` when `condition` evaluates to something present and
    /// non-empty; absent, null and `""` select `otherwise`.
    Conditional {
        condition: Box<Expr>,
        then: Option<Box<Expr>>,
        otherwise: Option<Box<Expr>>,
    },
    /// Evaluates `template` once per element of the `source` array, with the
    /// element as root. Absent or non-array sources yield `[]`.
    ArrayMap {
        source: Box<Expr>,
        template: Option<Box<Expr>>,
    },
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
pub struct EvalOptions {
    pub escape_templates: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            escape_templates: true,
        }
    }
}

// ─── Construction ──────────────────────────────────────────────────────────

impl Expr {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(path.into())
    }

    pub fn literal(value: Value) -> Self {
        Self::Literal(value)
    }

    pub fn template(text: impl Into<String>) -> Self {
        Self::Template(text.into())
    }

    pub fn if_exists(condition: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::Conditional {
            condition: Box::new(condition),
            then: Some(Box::new(then)),
            otherwise: Some(Box::new(otherwise)),
        }
    }

    /// First present path wins: `a` if it exists, else `b`, else ...
    pub fn coalesce<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        I::IntoIter: DoubleEndedIterator,
        S: Into<String>,
    {
        let mut iter = paths.into_iter().rev();
        let Some(last) = iter.next() else {
            return Self::Literal(Value::Null);
        };
        iter.fold(Self::path(last), |otherwise, p| {
            let p = Self::path(p);
            Self::if_exists(p.clone(), p, otherwise)
        })
    }

    pub fn array_map(source: impl Into<String>, template: Expr) -> Self {
        Self::ArrayMap {
            source: Box::new(Self::path(source)),
            template: Some(Box::new(template)),
        }
    }

    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Expr)>,
        K: Into<String>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }
}

// ─── Parsing ───────────────────────────────────────────────────────────────

impl Expr {
    pub fn parse(value: &Value) -> Result<Self, MappingError> {
        match value {
            Value::Object(map) => {
                let directives = map.keys().filter(|k| k.starts_with('@')).count();
                if directives == 0 {
                    let entries = map
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), Self::parse(v)?)))
                        .collect::<Result<Vec<_>, MappingError>>()?;
                    return Ok(Self::Object(entries));
                }
                if map.len() != 1 {
                    return Err(MappingError::InvalidDirective(format!(
                        "directive objects must have exactly one key, found: {}",
                        map.keys().cloned().collect::<Vec<_>>().join(", ")
                    )));
                }
                let (name, arg) = map.iter().next().ok_or_else(|| {
                    MappingError::InvalidDirective("empty directive object".to_string())
                })?;
                Self::parse_directive(name, arg)
            }
            Value::Array(items) => Ok(Self::Array(
                items.iter().map(Self::parse).collect::<Result<_, _>>()?,
            )),
            scalar => Ok(Self::Literal(scalar.clone())),
        }
    }

    fn parse_directive(name: &str, arg: &Value) -> Result<Self, MappingError> {
        match name {
            "@path" => match arg {
                Value::String(p) => Ok(Self::Path(p.clone())),
                other => Err(MappingError::InvalidDirective(format!(
                    "@path must be a string, got {}",
                    path::type_name(other)
                ))),
            },
            "@literal" => Self::parse(arg),
            "@template" => match arg {
                Value::String(t) => Ok(Self::Template(t.clone())),
                other => Err(MappingError::InvalidDirective(format!(
                    "@template must be a string, got {}",
                    path::type_name(other)
                ))),
            },
            "@if" => {
                let Value::Object(opts) = arg else {
                    return Err(MappingError::InvalidDirective(
                        "@if must be an object".to_string(),
                    ));
                };
                let condition = opts
                    .get("exists")
                    .or_else(|| opts.get("blank"))
                    .ok_or_else(|| {
                        MappingError::InvalidDirective(
                            "@if requires an \"exists\" or \"blank\" condition".to_string(),
                        )
                    })?;
                let branch = |key: &str| -> Result<Option<Box<Expr>>, MappingError> {
                    opts.get(key)
                        .map(|v| Self::parse(v).map(Box::new))
                        .transpose()
                };
                Ok(Self::Conditional {
                    condition: Box::new(Self::parse_source(condition)?),
                    then: branch("then")?,
                    otherwise: branch("else")?,
                })
            }
            "@arrayPath" => {
                let Value::Array(args) = arg else {
                    return Err(MappingError::InvalidDirective(
                        "@arrayPath must be an array of [source, template?]".to_string(),
                    ));
                };
                let source = args.first().ok_or_else(|| {
                    MappingError::InvalidDirective("@arrayPath requires a source".to_string())
                })?;
                if args.len() > 2 {
                    return Err(MappingError::InvalidDirective(
                        "@arrayPath takes at most two arguments".to_string(),
                    ));
                }
                Ok(Self::ArrayMap {
                    source: Box::new(Self::parse_source(source)?),
                    template: args
                        .get(1)
                        .map(|t| Self::parse(t).map(Box::new))
                        .transpose()?,
                })
            }
            other => Err(MappingError::InvalidDirective(format!(
                "unknown directive {other}"
            ))),
        }
    }

    /// Condition and array sources accept a bare path string as shorthand.
    fn parse_source(value: &Value) -> Result<Self, MappingError> {
        match value {
            Value::String(p) => Ok(Self::Path(p.clone())),
            other => Self::parse(other),
        }
    }

    /// JSON form, the inverse of [`Expr::parse`].
    pub fn to_json(&self) -> Value {
        match self {
            Self::Literal(v @ (Value::Object(_) | Value::Array(_))) => json!({ "@literal": v }),
            Self::Literal(v) => v.clone(),
            Self::Path(p) => json!({ "@path": p }),
            Self::Template(t) => json!({ "@template": t }),
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let mut opts = Map::new();
                opts.insert("exists".to_string(), condition.to_json());
                if let Some(then) = then {
                    opts.insert("then".to_string(), then.to_json());
                }
                if let Some(otherwise) = otherwise {
                    opts.insert("else".to_string(), otherwise.to_json());
                }
                json!({ "@if": opts })
            }
            Self::ArrayMap { source, template } => {
                let mut args = vec![source.to_json()];
                if let Some(t) = template {
                    args.push(t.to_json());
                }
                json!({ "@arrayPath": args })
            }
            Self::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

impl TryFrom<Value> for Expr {
    type Error = MappingError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}

// ─── Evaluation ────────────────────────────────────────────────────────────

impl Expr {
    pub fn evaluate(&self, root: &Value) -> Option<Value> {
        self.evaluate_with(root, &EvalOptions::default())
    }

    /// `None` means absent: the value is dropped from enclosing objects and
    /// lets the resolver fall through to a default.
    pub fn evaluate_with(&self, root: &Value, opts: &EvalOptions) -> Option<Value> {
        match self {
            Self::Literal(v) => Some(v.clone()),
            Self::Path(p) => path::lookup(root, p).cloned(),
            Self::Template(t) => Some(Value::String(template::render(
                t,
                root,
                opts.escape_templates,
            ))),
            Self::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let branch = if exists(condition.evaluate_with(root, opts).as_ref()) {
                    then
                } else {
                    otherwise
                };
                branch.as_ref().and_then(|b| b.evaluate_with(root, opts))
            }
            Self::ArrayMap { source, template } => {
                let items = match source.evaluate_with(root, opts) {
                    Some(Value::Array(items)) => items,
                    _ => return Some(Value::Array(Vec::new())),
                };
                let mapped = items
                    .iter()
                    .filter_map(|item| match template {
                        Some(t) => t.evaluate_with(item, opts),
                        None => Some(item.clone()),
                    })
                    .collect();
                Some(Value::Array(mapped))
            }
            Self::Object(entries) => Some(Value::Object(
                entries
                    .iter()
                    .filter_map(|(k, e)| e.evaluate_with(root, opts).map(|v| (k.clone(), v)))
                    .collect(),
            )),
            Self::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .filter_map(|e| e.evaluate_with(root, opts))
                    .collect(),
            )),
        }
    }
}

fn exists(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
        && !matches!(value, Some(Value::String(s)) if s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(mapping: Value, root: Value) -> Option<Value> {
        Expr::parse(&mapping).unwrap().evaluate(&root)
    }

    #[test]
    fn test_plain_json_passes_through() {
        let mapping = json!({ "a": 1, "b": "two", "c": [true, null] });
        assert_eq!(eval(mapping.clone(), json!({})), Some(mapping));
    }

    #[test]
    fn test_path_and_missing_values_removed() {
        let out = eval(
            json!({ "foo": { "@path": "$.a" }, "bar": { "@path": "$.missing" }, "baz": { "@path": "$.n" } }),
            json!({ "a": 1, "n": null }),
        );
        assert_eq!(out, Some(json!({ "foo": 1, "baz": null })));
    }

    #[test]
    fn test_literal_evaluates_nested_directives() {
        let out = eval(
            json!({ "@literal": { "nested": { "a": { "@path": "$.a" }, "b": { "@path": "$.b" } } } }),
            json!({ "a": "some value" }),
        );
        assert_eq!(out, Some(json!({ "nested": { "a": "some value" } })));
    }

    #[test]
    fn test_if_exists_treats_empty_string_as_absent() {
        let mapping = json!({
            "@if": { "exists": { "@path": "$.email" }, "then": { "@path": "$.email" }, "else": "fallback" }
        });
        assert_eq!(eval(mapping.clone(), json!({ "email": "a@b.co" })), Some(json!("a@b.co")));
        assert_eq!(eval(mapping.clone(), json!({ "email": "" })), Some(json!("fallback")));
        assert_eq!(eval(mapping.clone(), json!({ "email": null })), Some(json!("fallback")));
        assert_eq!(eval(mapping, json!({})), Some(json!("fallback")));
    }

    #[test]
    fn test_if_without_else_is_absent() {
        let out = eval(
            json!({ "x": { "@if": { "blank": "$.a", "then": 1 } } }),
            json!({}),
        );
        assert_eq!(out, Some(json!({})));
    }

    #[test]
    fn test_array_path() {
        let mapping = json!({
            "@arrayPath": ["$.products", { "itemId": { "@path": "$.product_id" }, "qty": { "@path": "$.quantity" } }]
        });
        let out = eval(
            mapping.clone(),
            json!({ "products": [{ "product_id": "a", "quantity": 2 }, { "product_id": "b" }] }),
        );
        assert_eq!(out, Some(json!([{ "itemId": "a", "qty": 2 }, { "itemId": "b" }])));

        assert_eq!(eval(mapping.clone(), json!({})), Some(json!([])));
        assert_eq!(eval(mapping, json!({ "products": { "product_id": "a" } })), Some(json!([])));
    }

    #[test]
    fn test_array_path_without_template_copies_elements() {
        let out = eval(json!({ "@arrayPath": ["$.tags"] }), json!({ "tags": ["x", "y"] }));
        assert_eq!(out, Some(json!(["x", "y"])));
    }

    #[test]
    fn test_template_directive() {
        let out = eval(json!({ "@template": "Hello {{name}}" }), json!({ "name": "Ada" }));
        assert_eq!(out, Some(json!("Hello Ada")));
    }

    #[test]
    fn test_invalid_directives_rejected() {
        assert!(Expr::parse(&json!({ "@path": {} })).is_err());
        assert!(Expr::parse(&json!({ "@path": "$.a", "other": 1 })).is_err());
        assert!(Expr::parse(&json!({ "@nope": "$.a" })).is_err());
        assert!(Expr::parse(&json!({ "@if": { "then": 1 } })).is_err());
        assert!(Expr::parse(&json!({ "@arrayPath": "$.a" })).is_err());
        assert!(Expr::parse(&json!({ "a": { "@template": 4 } })).is_err());
    }

    #[test]
    fn test_coalesce_prefers_first_present() {
        let expr = Expr::coalesce(["$.traits.email", "$.properties.email"]);
        let root = json!({ "traits": { "email": "" }, "properties": { "email": "p@b.co" } });
        assert_eq!(expr.evaluate(&root), Some(json!("p@b.co")));
    }

    #[test]
    fn test_json_form_reparses_to_same_ast() {
        let original = json!({
            "items": { "@arrayPath": ["$.products", { "id": { "@path": "$.sku" } }] },
            "user": { "@if": { "exists": { "@path": "$.userId" }, "then": { "@path": "$.userId" }, "else": { "@path": "$.anonymousId" } } }
        });
        let expr = Expr::parse(&original).unwrap();
        assert_eq!(Expr::parse(&expr.to_json()).unwrap(), expr);
    }
}
