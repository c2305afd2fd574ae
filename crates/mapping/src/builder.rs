//! Payload assembly. Walks resolved values in declaration order and applies
//! adapter post-processors, which are pure functions returning a patch.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::path;
use crate::resolver::ResolvedPayload;
use crate::schema::{FieldSchema, FieldSpec};

/// Built request payload. Key order is deterministic, so serializing the
/// same resolved values twice yields identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn lookup(&self, dotted: &str) -> Option<&Value> {
        path::lookup_in(&self.0, dotted)
    }

    pub fn get_str(&self, dotted: &str) -> Option<&str> {
        self.lookup(dotted).and_then(Value::as_str)
    }

    pub fn is_set(&self, dotted: &str) -> bool {
        path::is_set(self.lookup(dotted))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadPatch {
    pub set: Vec<(String, Value)>,
    pub remove: Vec<String>,
}

impl PayloadPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, dotted: impl Into<String>, value: Value) -> Self {
        self.set.push((dotted.into(), value));
        self
    }

    pub fn remove(mut self, dotted: impl Into<String>) -> Self {
        self.remove.push(dotted.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }

    fn apply(self, out: &mut Map<String, Value>) {
        for dotted in &self.remove {
            path::remove_in(out, dotted);
        }
        for (dotted, value) in self.set {
            path::set_in(out, &dotted, value);
        }
    }
}

/// Adapter-specific reshaping of resolved values. Implementations must be
/// pure: no I/O and no state between calls.
pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Top-level output keys this processor may create. Validator rules may
    /// reference these in addition to schema fields.
    fn produces(&self) -> Vec<String> {
        Vec::new()
    }

    fn process(&self, values: &ResolvedPayload) -> PayloadPatch;
}

pub struct PayloadBuilder<'a> {
    schema: &'a FieldSchema,
    processors: &'a [Arc<dyn PostProcessor>],
}

impl<'a> PayloadBuilder<'a> {
    pub fn new(schema: &'a FieldSchema) -> Self {
        Self {
            schema,
            processors: &[],
        }
    }

    pub fn with_processors(mut self, processors: &'a [Arc<dyn PostProcessor>]) -> Self {
        self.processors = processors;
        self
    }

    /// Every processor sees the same resolved values; patches apply in
    /// processor order.
    pub fn build(&self, values: &ResolvedPayload) -> Payload {
        let mut out = Map::new();
        for spec in self.schema.fields() {
            if let Some(value) = values.get(&spec.key) {
                out.insert(spec.key.clone(), assemble(spec, value));
            }
        }
        for processor in self.processors {
            processor.process(values).apply(&mut out);
        }
        Payload(out)
    }
}

fn assemble(spec: &FieldSpec, value: &Value) -> Value {
    if spec.properties.is_empty() {
        return value.clone();
    }
    match value {
        Value::Object(map) => Value::Object(assemble_object(spec, map)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => Value::Object(assemble_object(spec, map)),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn assemble_object(spec: &FieldSpec, map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for prop in &spec.properties {
        if let Some(v) = map.get(&prop.key) {
            out.insert(prop.key.clone(), assemble(prop, v));
        }
    }
    for (k, v) in map {
        if !out.contains_key(k) {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

// ─── Built-in processors ───────────────────────────────────────────────────

/// Splits an identifier object into named output paths plus a free-form bag
/// for everything unrecognised.
///
/// ```text
/// userIdentifiers: { phone, email, clientUserId, loyaltyId }
///   -> user: { phone, email, externalIdentifiers: { clientUserId, customIdentifiers: { loyaltyId } } }
/// ```
#[derive(Debug, Clone)]
pub struct SplitIdentifiers {
    source: String,
    target: String,
    named: Vec<(String, String)>,
    custom_path: String,
}

impl SplitIdentifiers {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            named: Vec::new(),
            custom_path: "customIdentifiers".to_string(),
        }
    }

    /// Route identifier `key` to `to` (dotted, relative to the target).
    pub fn named(mut self, key: impl Into<String>, to: impl Into<String>) -> Self {
        self.named.push((key.into(), to.into()));
        self
    }

    pub fn custom_into(mut self, dotted: impl Into<String>) -> Self {
        self.custom_path = dotted.into();
        self
    }
}

impl PostProcessor for SplitIdentifiers {
    fn name(&self) -> &'static str {
        "split_identifiers"
    }

    fn produces(&self) -> Vec<String> {
        vec![self.target.clone()]
    }

    fn process(&self, values: &ResolvedPayload) -> PayloadPatch {
        let patch = PayloadPatch::new().remove(&self.source);
        let Some(Value::Object(ids)) = values.get(&self.source) else {
            return patch;
        };

        let mut target = Map::new();
        let mut custom = Map::new();
        for (key, value) in ids {
            if !path::is_set(Some(value)) {
                continue;
            }
            match self.named.iter().find(|(k, _)| k == key) {
                Some((_, to)) => path::set_in(&mut target, to, value.clone()),
                None => {
                    custom.insert(key.clone(), value.clone());
                }
            }
        }
        if !custom.is_empty() {
            path::set_in(&mut target, &self.custom_path, Value::Object(custom));
        }
        patch.set(&self.target, Value::Object(target))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Trim and lower-case.
    Email,
    /// Keep digits and a leading `+`.
    Phone,
    Trim,
}

impl Normalization {
    fn apply(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match self {
            Self::Email => trimmed.to_lowercase(),
            Self::Phone => trimmed
                .chars()
                .enumerate()
                .filter(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '+'))
                .map(|(_, c)| c)
                .collect(),
            Self::Trim => trimmed.to_string(),
        }
    }
}

/// Replaces identifier values with their SHA-256 hex digest after
/// normalization. Values that already look like a digest are left alone.
#[derive(Debug, Clone)]
pub struct HashIdentifiers {
    fields: Vec<(String, Normalization)>,
}

impl HashIdentifiers {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn field(mut self, dotted: impl Into<String>, normalization: Normalization) -> Self {
        self.fields.push((dotted.into(), normalization));
        self
    }
}

impl Default for HashIdentifiers {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

impl PostProcessor for HashIdentifiers {
    fn name(&self) -> &'static str {
        "hash_identifiers"
    }

    fn process(&self, values: &ResolvedPayload) -> PayloadPatch {
        self.fields
            .iter()
            .fold(PayloadPatch::new(), |patch, (dotted, normalization)| {
                match values.get_str(dotted) {
                    Some(raw) if !raw.trim().is_empty() && !is_sha256_hex(raw) => {
                        let hashed = sha256_hex(&normalization.apply(raw));
                        patch.set(dotted, Value::String(hashed))
                    }
                    _ => patch,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::resolver::{MappingOverride, Resolver};
    use actionkit_core::RawEvent;
    use serde_json::json;

    fn schema() -> FieldSchema {
        FieldSchema::new(vec![
            FieldSpec::string("type").default_path("$.event"),
            FieldSpec::object("userIdentifiers").default_expr(Expr::object([
                ("phone", Expr::path("$.context.traits.phone")),
                ("email", Expr::path("$.context.traits.email")),
                ("clientUserId", Expr::path("$.userId")),
                ("loyaltyId", Expr::path("$.properties.loyalty_id")),
            ])),
            FieldSpec::object("properties").default_path("$.properties"),
        ])
        .unwrap()
    }

    fn event() -> RawEvent {
        RawEvent::track("Order Completed")
            .with_user_id("u-1")
            .with_context("traits", json!({ "email": "ada@example.com" }))
            .with_property("loyalty_id", json!("L-9"))
            .with_property("total", json!(12.5))
    }

    fn splitter() -> Vec<Arc<dyn PostProcessor>> {
        vec![Arc::new(
            SplitIdentifiers::new("userIdentifiers", "user")
                .named("phone", "phone")
                .named("email", "email")
                .named("clientUserId", "externalIdentifiers.clientUserId")
                .custom_into("externalIdentifiers.customIdentifiers"),
        )]
    }

    #[test]
    fn test_build_is_byte_identical() {
        let schema = schema();
        let resolved = Resolver::new(&schema).resolve(&MappingOverride::new(), &event()).unwrap();
        let processors = splitter();
        let builder = PayloadBuilder::new(&schema).with_processors(&processors);
        let first = builder.build(&resolved).to_json_string().unwrap();
        let second = builder.build(&resolved).to_json_string().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_split_identifiers() {
        let schema = schema();
        let resolved = Resolver::new(&schema).resolve(&MappingOverride::new(), &event()).unwrap();
        let processors = splitter();
        let payload = PayloadBuilder::new(&schema).with_processors(&processors).build(&resolved);

        assert_eq!(
            payload.into_value(),
            json!({
                "type": "Order Completed",
                "properties": { "loyalty_id": "L-9", "total": 12.5 },
                "user": {
                    "email": "ada@example.com",
                    "externalIdentifiers": {
                        "clientUserId": "u-1",
                        "customIdentifiers": { "loyaltyId": "L-9" }
                    }
                }
            })
        );
    }

    #[test]
    fn test_key_order_follows_declaration() {
        let schema = FieldSchema::new(vec![
            FieldSpec::string("z").default_path("$.properties.z"),
            FieldSpec::string("a").default_path("$.properties.a"),
        ])
        .unwrap();
        let mut reversed = Map::new();
        reversed.insert("a".into(), json!("1"));
        reversed.insert("z".into(), json!("2"));
        let payload = PayloadBuilder::new(&schema).build(&ResolvedPayload::from_map(reversed));
        assert_eq!(payload.to_json_string().unwrap(), r#"{"z":"2","a":"1"}"#);
    }

    #[test]
    fn test_hash_identifiers() {
        let mut values = Map::new();
        values.insert("email".into(), json!("  Ada@Example.COM "));
        values.insert("phone".into(), json!("+1 (555) 123-4567"));
        let already = sha256_hex("x");
        values.insert("hashed".into(), json!(already.clone()));
        let resolved = ResolvedPayload::from_map(values);

        let patch = HashIdentifiers::new()
            .field("email", Normalization::Email)
            .field("phone", Normalization::Phone)
            .field("hashed", Normalization::Email)
            .process(&resolved);

        assert_eq!(
            patch.set,
            vec![
                ("email".to_string(), json!(sha256_hex("ada@example.com"))),
                ("phone".to_string(), json!(sha256_hex("+15551234567"))),
            ]
        );
    }
}
