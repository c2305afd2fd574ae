//! Field declarations for an action: kinds, defaults, requiredness and
//! constraints. A [`FieldSchema`] is checked once at construction and is
//! read-only afterwards.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MappingError;
use crate::expr::Expr;
use crate::path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Datetime,
    Object,
    Array(Box<FieldKind>),
}

impl FieldKind {
    pub fn array_of(kind: FieldKind) -> Self {
        Self::Array(Box::new(kind))
    }

    /// JSON type name used in validation messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::String | Self::Datetime => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array(_) => "array",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    Email,
    Uri,
    DateTime,
    Uuid,
    Hostname,
}

impl Format {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Uri => "URI",
            Self::DateTime => "date-time",
            Self::Uuid => "UUID",
            Self::Hostname => "hostname",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub value: Value,
}

impl Choice {
    pub fn new(label: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Compiled by [`FieldSchema::new`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Format>,
}

// ─── Requiredness ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    All,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Is,
    IsNot,
}

/// Predicate over a sibling field. Without a `value` the condition tests
/// whether the sibling is set (`Is`) or unset (`IsNot`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field_key: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependsOn {
    #[serde(rename = "match")]
    pub match_mode: MatchMode,
    pub conditions: Vec<FieldCondition>,
}

impl DependsOn {
    /// "Required when `key` is not set."
    pub fn unless_set(key: impl Into<String>) -> Self {
        Self {
            match_mode: MatchMode::All,
            conditions: vec![FieldCondition {
                field_key: key.into(),
                operator: ConditionOperator::IsNot,
                value: None,
            }],
        }
    }

    pub fn when_equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            match_mode: MatchMode::All,
            conditions: vec![FieldCondition {
                field_key: key.into(),
                operator: ConditionOperator::Is,
                value: Some(value.into()),
            }],
        }
    }

    pub fn holds(&self, siblings: &Map<String, Value>) -> bool {
        let check = |c: &FieldCondition| {
            let current = siblings.get(&c.field_key);
            match (&c.operator, &c.value) {
                (ConditionOperator::Is, None) => path::is_set(current),
                (ConditionOperator::IsNot, None) => !path::is_set(current),
                (ConditionOperator::Is, Some(expected)) => current == Some(expected),
                (ConditionOperator::IsNot, Some(expected)) => {
                    path::is_set(current) && current != Some(expected)
                }
            }
        };
        match self.match_mode {
            MatchMode::All => self.conditions.iter().all(check),
            MatchMode::Any => self.conditions.iter().any(check),
        }
    }

    fn references(&self) -> impl Iterator<Item = &str> + '_ {
        self.conditions.iter().map(|c| c.field_key.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    #[default]
    Optional,
    Required,
    When(DependsOn),
}

impl Requirement {
    pub fn is_required(&self, siblings: &Map<String, Value>) -> bool {
        match self {
            Self::Optional => false,
            Self::Required => true,
            Self::When(depends_on) => depends_on.holds(siblings),
        }
    }
}

// ─── FieldSpec ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub key: String,
    pub label: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub kind: FieldKind,
    pub required: Requirement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Expr>,
    pub allow_null: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Choice>>,
    pub constraints: Constraints,
    /// Members of object fields (or of each element for arrays of objects).
    /// Property defaults are not evaluated; the parent's default builds the
    /// whole object.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<FieldSpec>,
    pub additional_properties: bool,
    /// Choices come from a dynamic provider at configuration time.
    pub dynamic: bool,
}

impl FieldSpec {
    pub fn new(key: impl Into<String>, kind: FieldKind) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
            description: String::new(),
            additional_properties: matches!(kind, FieldKind::Object),
            kind,
            required: Requirement::Optional,
            default: None,
            allow_null: false,
            choices: None,
            constraints: Constraints::default(),
            properties: Vec::new(),
            dynamic: false,
        }
    }

    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::String)
    }

    pub fn number(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Number)
    }

    pub fn integer(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Integer)
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Boolean)
    }

    pub fn datetime(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Datetime)
    }

    pub fn object(key: impl Into<String>) -> Self {
        Self::new(key, FieldKind::Object)
    }

    pub fn array(key: impl Into<String>, of: FieldKind) -> Self {
        Self::new(key, FieldKind::array_of(of))
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = Requirement::Required;
        self
    }

    pub fn required_when(mut self, depends_on: DependsOn) -> Self {
        self.required = Requirement::When(depends_on);
        self
    }

    pub fn default_expr(mut self, expr: Expr) -> Self {
        self.default = Some(expr);
        self
    }

    pub fn default_path(self, path: &str) -> Self {
        self.default_expr(Expr::path(path))
    }

    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn choices(mut self, choices: Vec<Choice>) -> Self {
        self.choices = Some(choices);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.constraints.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.constraints.max = Some(max);
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.constraints.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.constraints.max_length = Some(len);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.constraints.pattern = Some(pattern.into());
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.constraints.format = Some(format);
        self
    }

    pub fn properties(mut self, properties: Vec<FieldSpec>) -> Self {
        self.properties = properties;
        self
    }

    pub fn additional_properties(mut self, allowed: bool) -> Self {
        self.additional_properties = allowed;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.dynamic = true;
        self
    }

    pub fn is_object_like(&self) -> bool {
        match &self.kind {
            FieldKind::Object => true,
            FieldKind::Array(inner) => **inner == FieldKind::Object,
            _ => false,
        }
    }
}

// ─── FieldSchema ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
    patterns: HashMap<String, Regex>,
}

impl FieldSchema {
    /// Rejects duplicate keys, requirement conditions naming unknown
    /// siblings, cyclic requiredness and patterns that fail to compile.
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self, MappingError> {
        let mut patterns = HashMap::new();
        check_level(&fields, None, &mut patterns)?;
        Ok(Self { fields, patterns })
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Whether a dotted path addresses a declared field. Paths that descend
    /// into a free-form object are accepted once the object is reached.
    pub fn contains_path(&self, dotted: &str) -> bool {
        let mut level = self.fields.as_slice();
        for segment in dotted.split('.') {
            if segment.parse::<usize>().is_ok() {
                continue;
            }
            let Some(spec) = level.iter().find(|f| f.key == segment) else {
                return false;
            };
            if spec.properties.is_empty() {
                return true;
            }
            level = spec.properties.as_slice();
        }
        true
    }

    pub fn pattern(&self, field_path: &str) -> Option<&Regex> {
        self.patterns.get(field_path)
    }

    /// The mapping a new subscription starts from: every field's default.
    pub fn default_mapping(&self) -> crate::resolver::MappingOverride {
        self.fields
            .iter()
            .filter_map(|f| f.default.clone().map(|d| (f.key.clone(), d)))
            .collect()
    }
}

fn check_level(
    fields: &[FieldSpec],
    parent: Option<&str>,
    patterns: &mut HashMap<String, Regex>,
) -> Result<(), MappingError> {
    let qualify = |key: &str| match parent {
        Some(p) => format!("{p}.{key}"),
        None => key.to_string(),
    };

    let mut seen = HashSet::new();
    for spec in fields {
        if !seen.insert(spec.key.as_str()) {
            return Err(MappingError::DuplicateField(qualify(spec.key.as_str())));
        }
    }

    for spec in fields {
        if let Requirement::When(depends_on) = &spec.required {
            if let Some(reference) = depends_on.references().find(|r| !seen.contains(r)) {
                return Err(MappingError::UnknownReference {
                    field: qualify(spec.key.as_str()),
                    reference: reference.to_string(),
                });
            }
        }
        if let Some(source) = &spec.constraints.pattern {
            let regex = Regex::new(source).map_err(|e| MappingError::InvalidPattern {
                field: qualify(spec.key.as_str()),
                message: e.to_string(),
            })?;
            patterns.insert(qualify(spec.key.as_str()), regex);
        }
        if !spec.properties.is_empty() {
            check_level(&spec.properties, Some(&qualify(spec.key.as_str())), patterns)?;
        }
    }

    detect_requirement_cycle(fields).map_err(|cycle| {
        MappingError::CyclicRequirement(
            cycle
                .iter()
                .map(|k| qualify(k.as_str()))
                .collect::<Vec<_>>()
                .join(" -> "),
        )
    })
}

/// Depth-first search over "requiredness depends on" edges.
fn detect_requirement_cycle(fields: &[FieldSpec]) -> Result<(), Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let index: HashMap<&str, usize> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| (f.key.as_str(), i))
        .collect();
    let edges: Vec<Vec<usize>> = fields
        .iter()
        .map(|f| match &f.required {
            Requirement::When(d) => d.references().filter_map(|r| index.get(r).copied()).collect(),
            _ => Vec::new(),
        })
        .collect();

    fn visit(
        node: usize,
        edges: &[Vec<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::InProgress;
        stack.push(node);
        for &next in &edges[node] {
            match marks[next] {
                Mark::InProgress => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, edges, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; fields.len()];
    for start in 0..fields.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        let mut stack = Vec::new();
        if let Some(cycle) = visit(start, &edges, &mut marks, &mut stack) {
            return Err(cycle.into_iter().map(|i| fields[i].key.clone()).collect());
        }
    }
    Ok(())
}
