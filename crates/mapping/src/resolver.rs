//! Resolves a [`FieldSchema`] against an event and a user mapping into a
//! typed [`ResolvedPayload`].

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use tracing::debug;

use actionkit_core::{RawEvent, ValidationError};

use crate::error::MappingError;
use crate::expr::{EvalOptions, Expr};
use crate::path;
use crate::schema::{FieldKind, FieldSchema, FieldSpec};

// ─── MappingOverride ───────────────────────────────────────────────────────

/// Per-subscription mapping from field key to expression. Author order is
/// preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingOverride {
    entries: Vec<(String, Expr)>,
}

impl MappingOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: &Value) -> Result<Self, MappingError> {
        let Value::Object(map) = value else {
            return Err(MappingError::InvalidDirective(
                "mapping must be a JSON object".to_string(),
            ));
        };
        map.iter()
            .map(|(k, v)| Ok((k.clone(), Expr::parse(v)?)))
            .collect()
    }

    pub fn with(mut self, key: impl Into<String>, expr: Expr) -> Self {
        self.insert(key, expr);
        self
    }

    /// Replaces an existing entry in place or appends a new one.
    pub fn insert(&mut self, key: impl Into<String>, expr: Expr) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = expr,
            None => self.entries.push((key, expr)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Expr> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (String, Expr)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, e)| (k.clone(), e.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Expr)> for MappingOverride {
    fn from_iter<T: IntoIterator<Item = (String, Expr)>>(iter: T) -> Self {
        let mut mapping = Self::new();
        for (k, e) in iter {
            mapping.insert(k, e);
        }
        mapping
    }
}

impl Serialize for MappingOverride {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MappingOverride {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

// ─── ResolvedPayload ───────────────────────────────────────────────────────

/// Concrete field values in schema declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResolvedPayload {
    values: Map<String, Value>,
}

impl ResolvedPayload {
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Dotted lookup, e.g. `userIdentifiers.email`.
    pub fn lookup(&self, dotted: &str) -> Option<&Value> {
        path::lookup_in(&self.values, dotted)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.lookup(key).and_then(Value::as_str)
    }

    pub fn is_set(&self, dotted: &str) -> bool {
        path::is_set(self.lookup(dotted))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ─── Resolver ──────────────────────────────────────────────────────────────

pub struct Resolver<'a> {
    schema: &'a FieldSchema,
    options: EvalOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(schema: &'a FieldSchema) -> Self {
        Self {
            schema,
            options: EvalOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EvalOptions) -> Self {
        self.options = options;
        self
    }

    /// Override first; a non-literal override that resolves to nothing falls
    /// through to the field default.
    pub fn resolve_field(
        &self,
        spec: &FieldSpec,
        mapping: &MappingOverride,
        root: &Value,
    ) -> Result<Option<Value>, ValidationError> {
        let default = || {
            spec.default
                .as_ref()
                .and_then(|d| d.evaluate_with(root, &self.options))
        };
        let raw = match mapping.get(&spec.key) {
            Some(expr) if expr.is_literal() => expr.evaluate_with(root, &self.options),
            Some(expr) => expr
                .evaluate_with(root, &self.options)
                .or_else(default),
            None => default(),
        };
        match raw {
            Some(value) => coerce(spec, &spec.key, value),
            None => Ok(None),
        }
    }

    /// Resolves every field, then checks requiredness against the complete
    /// set so sibling conditions see final values.
    pub fn resolve(
        &self,
        mapping: &MappingOverride,
        event: &RawEvent,
    ) -> Result<ResolvedPayload, ValidationError> {
        self.resolve_value(mapping, &event.to_value())
    }

    pub fn resolve_value(
        &self,
        mapping: &MappingOverride,
        root: &Value,
    ) -> Result<ResolvedPayload, ValidationError> {
        let mut values = Map::new();
        for spec in self.schema.fields() {
            if let Some(value) = self.resolve_field(spec, mapping, root)? {
                values.insert(spec.key.clone(), value);
            }
        }
        check_required(self.schema.fields(), &values, None)?;
        debug!(fields = values.len(), "resolved payload");
        Ok(ResolvedPayload { values })
    }
}

// ─── Coercion ──────────────────────────────────────────────────────────────

fn coerce(spec: &FieldSpec, at: &str, value: Value) -> Result<Option<Value>, ValidationError> {
    if value.is_null() {
        return Ok(spec.allow_null.then_some(Value::Null));
    }
    coerce_kind(spec, &spec.kind, at, value).map(Some)
}

fn coerce_kind(
    spec: &FieldSpec,
    kind: &FieldKind,
    at: &str,
    value: Value,
) -> Result<Value, ValidationError> {
    let mismatch =
        |v: &Value| ValidationError::wrong_type(at, kind.display_name(), path::type_name(v));

    match kind {
        FieldKind::String => match value {
            Value::String(_) => Ok(value),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(&other)),
        },
        FieldKind::Number => match value {
            Value::Number(_) => Ok(value),
            Value::String(ref s) => parse_number(s.trim()).ok_or_else(|| mismatch(&value)),
            other => Err(mismatch(&other)),
        },
        FieldKind::Integer => {
            let number = match value {
                Value::Number(n) => n,
                Value::String(ref s) => match parse_number(s.trim()) {
                    Some(Value::Number(n)) => n,
                    _ => return Err(mismatch(&value)),
                },
                other => return Err(mismatch(&other)),
            };
            if number.is_i64() || number.is_u64() {
                return Ok(Value::Number(number));
            }
            match number.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::Number(Number::from(f as i64)))
                }
                _ => Err(ValidationError::wrong_type(at, "integer", "number")),
            }
        }
        FieldKind::Boolean => match value {
            Value::Bool(_) => Ok(value),
            Value::String(ref s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(ref s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            other => Err(mismatch(&other)),
        },
        FieldKind::Datetime => coerce_datetime(at, value),
        FieldKind::Object => match value {
            Value::Object(map) => Ok(Value::Object(coerce_properties(spec, at, map)?)),
            other => Err(mismatch(&other)),
        },
        FieldKind::Array(inner) => {
            let items = match value {
                Value::Array(items) => items,
                single => vec![single],
            };
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                if item.is_null() {
                    continue;
                }
                out.push(coerce_kind(spec, inner, &format!("{at}.{i}"), item)?);
            }
            Ok(Value::Array(out))
        }
    }
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Accepts RFC 3339, plain dates and epoch numbers (seconds, or
/// milliseconds when large enough). Epochs are normalized to RFC 3339.
fn coerce_datetime(at: &str, value: Value) -> Result<Value, ValidationError> {
    let invalid = || {
        ValidationError::for_field(
            at,
            format!(
                "The value at /{} should be a valid date-time string but it was not.",
                at.replace('.', "/")
            ),
        )
    };
    match value {
        Value::String(ref s) => {
            if DateTime::parse_from_rfc3339(s).is_ok()
                || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            {
                Ok(value)
            } else {
                Err(invalid())
            }
        }
        Value::Number(ref n) => {
            let epoch = n.as_i64().ok_or_else(invalid)?;
            let parsed = if epoch.abs() >= 100_000_000_000 {
                Utc.timestamp_millis_opt(epoch).single()
            } else {
                Utc.timestamp_opt(epoch, 0).single()
            };
            parsed
                .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
                .ok_or_else(invalid)
        }
        _ => Err(ValidationError::wrong_type(
            at,
            "string",
            path::type_name(&value),
        )),
    }
}

/// Declared properties first, in declaration order, then undeclared keys
/// when the field allows them.
fn coerce_properties(
    spec: &FieldSpec,
    at: &str,
    mut map: Map<String, Value>,
) -> Result<Map<String, Value>, ValidationError> {
    if spec.properties.is_empty() {
        return Ok(map);
    }
    let mut out = Map::new();
    for prop in &spec.properties {
        if let Some(value) = map.shift_remove(&prop.key) {
            if let Some(coerced) = coerce(prop, &format!("{at}.{}", prop.key), value)? {
                out.insert(prop.key.clone(), coerced);
            }
        }
    }
    if spec.additional_properties {
        out.extend(map);
    }
    Ok(out)
}

// ─── Requiredness ──────────────────────────────────────────────────────────

fn check_required(
    fields: &[FieldSpec],
    values: &Map<String, Value>,
    parent: Option<&str>,
) -> Result<(), ValidationError> {
    for spec in fields {
        let value = values.get(&spec.key);
        if value.is_none() && spec.required.is_required(values) {
            return Err(match parent {
                Some(p) => ValidationError::missing_property(p, &spec.key),
                None => ValidationError::missing_field(&spec.key),
            });
        }
        if spec.properties.is_empty() {
            continue;
        }
        let here = match parent {
            Some(p) => format!("{p}.{}", spec.key),
            None => spec.key.clone(),
        };
        match value {
            Some(Value::Object(inner)) => check_required(&spec.properties, inner, Some(&here))?,
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    if let Value::Object(inner) = item {
                        check_required(&spec.properties, inner, Some(&format!("{here}.{i}")))?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DependsOn;
    use serde_json::json;

    fn schema() -> FieldSchema {
        FieldSchema::new(vec![
            FieldSpec::string("userId").default_expr(Expr::coalesce(["$.userId", "$.anonymousId"])),
            FieldSpec::string("email")
                .default_expr(Expr::coalesce(["$.traits.email", "$.properties.email"]))
                .required_when(DependsOn::unless_set("phone")),
            FieldSpec::string("phone").default_path("$.properties.phone"),
            FieldSpec::number("price").default_path("$.properties.price"),
            FieldSpec::boolean("subscribed").default_path("$.properties.subscribed"),
        ])
        .unwrap()
    }

    fn event() -> RawEvent {
        RawEvent::track("Order Completed")
            .with_user_id("user-1")
            .with_trait("email", json!("ada@example.com"))
            .with_property("price", json!("19.99"))
            .with_property("subscribed", json!("true"))
    }

    #[test]
    fn test_defaults_and_coercion() {
        let schema = schema();
        let resolved = Resolver::new(&schema)
            .resolve(&MappingOverride::new(), &event())
            .unwrap();
        assert_eq!(resolved.get("userId"), Some(&json!("user-1")));
        assert_eq!(resolved.get("price"), Some(&json!(19.99)));
        assert_eq!(resolved.get("subscribed"), Some(&json!(true)));
        assert_eq!(resolved.get("phone"), None);
        let keys: Vec<_> = resolved.as_map().keys().cloned().collect();
        assert_eq!(keys, vec!["userId", "email", "price", "subscribed"]);
    }

    #[test]
    fn test_override_beats_default() {
        let schema = schema();
        let mapping = MappingOverride::new()
            .with("userId", Expr::literal(json!("override-user")))
            .with("email", Expr::path("$.properties.alt_email"));
        let event = event().with_property("alt_email", json!("alt@example.com"));
        let resolved = Resolver::new(&schema).resolve(&mapping, &event).unwrap();
        assert_eq!(resolved.get("userId"), Some(&json!("override-user")));
        assert_eq!(resolved.get("email"), Some(&json!("alt@example.com")));
    }

    #[test]
    fn test_missing_override_path_falls_through_to_default() {
        let schema = schema();
        let mapping = MappingOverride::new().with("email", Expr::path("$.properties.nope"));
        let resolved = Resolver::new(&schema).resolve(&mapping, &event()).unwrap();
        assert_eq!(resolved.get("email"), Some(&json!("ada@example.com")));
    }

    #[test]
    fn test_bad_number_cites_field() {
        let schema = schema();
        let event = event().with_property("price", json!("cheap"));
        let err = Resolver::new(&schema)
            .resolve(&MappingOverride::new(), &event)
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("price"));
        assert_eq!(err.message, "The value at /price should be a number but it was string.");
    }

    #[test]
    fn test_conditional_requirement_evaluated_after_full_pass() {
        let schema = schema();
        let no_email = RawEvent::track("x").with_property("phone", json!("+15551234567"));
        assert!(Resolver::new(&schema)
            .resolve(&MappingOverride::new(), &no_email)
            .is_ok());

        let nothing = RawEvent::track("x");
        let err = Resolver::new(&schema)
            .resolve(&MappingOverride::new(), &nothing)
            .unwrap_err();
        assert_eq!(err.message, "The root value is missing the required field 'email'.");
    }

    #[test]
    fn test_null_dropped_unless_allowed() {
        let schema = FieldSchema::new(vec![
            FieldSpec::string("a").default_path("$.properties.a"),
            FieldSpec::string("b").default_path("$.properties.a").allow_null(),
        ])
        .unwrap();
        let event = RawEvent::track("x").with_property("a", Value::Null);
        let resolved = Resolver::new(&schema).resolve(&MappingOverride::new(), &event).unwrap();
        assert_eq!(resolved.get("a"), None);
        assert_eq!(resolved.get("b"), Some(&Value::Null));
    }

    #[test]
    fn test_object_properties_ordered_and_nested_required() {
        let schema = FieldSchema::new(vec![FieldSpec::object("user")
            .default_path("$.traits")
            .additional_properties(false)
            .properties(vec![
                FieldSpec::string("email").required(),
                FieldSpec::integer("age"),
            ])])
        .unwrap();

        let event = RawEvent::identify("u")
            .with_trait("age", json!("42"))
            .with_trait("nickname", json!("ada"))
            .with_trait("email", json!("ada@example.com"));
        let resolved = Resolver::new(&schema).resolve(&MappingOverride::new(), &event).unwrap();
        assert_eq!(
            serde_json::to_string(&resolved).unwrap(),
            r#"{"user":{"email":"ada@example.com","age":42}}"#
        );

        let missing = RawEvent::identify("u").with_trait("age", json!(3));
        let err = Resolver::new(&schema).resolve(&MappingOverride::new(), &missing).unwrap_err();
        assert_eq!(err.message, "The value at /user is missing the required field 'email'.");
    }

    #[test]
    fn test_datetime_epoch_normalized() {
        let schema = FieldSchema::new(vec![FieldSpec::datetime("at").default_path("$.properties.at")]).unwrap();
        let event = RawEvent::track("x").with_property("at", json!(1_700_000_000_000i64));
        let resolved = Resolver::new(&schema).resolve(&MappingOverride::new(), &event).unwrap();
        assert_eq!(resolved.get("at"), Some(&json!("2023-11-14T22:13:20.000Z")));

        let bad = RawEvent::track("x").with_property("at", json!("yesterday"));
        assert!(Resolver::new(&schema).resolve(&MappingOverride::new(), &bad).is_err());
    }

    #[test]
    fn test_mapping_override_deserializes() {
        let mapping: MappingOverride = serde_json::from_value(json!({
            "email": { "@path": "$.traits.work_email" },
            "userId": "fixed"
        }))
        .unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.get("userId"), Some(&Expr::literal(json!("fixed"))));
        assert!(serde_json::from_value::<MappingOverride>(json!({ "x": { "@bad": 1 } })).is_err());
    }
}
