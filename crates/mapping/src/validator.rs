//! Payload validation. Schema constraints are checked against resolved
//! values; adapter [`Rule`]s run against the built payload in declaration
//! order and the first failure is reported.

use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::DateTime;
use regex::Regex;
use serde_json::Value;

use actionkit_core::{ErrorCode, ValidationError};

use crate::builder::Payload;
use crate::currency;
use crate::resolver::ResolvedPayload;
use crate::schema::{FieldSchema, FieldSpec, Format};

type CustomCheck = Arc<dyn Fn(&Payload) -> Result<(), ValidationError> + Send + Sync>;

#[derive(Clone)]
pub enum Rule {
    AtLeastOneOf {
        fields: Vec<String>,
        message: Option<String>,
    },
    Range {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    Pattern {
        field: String,
        regex: Regex,
        message: Option<String>,
    },
    OneOf {
        field: String,
        allowed: Vec<String>,
        case_insensitive: bool,
        code: ErrorCode,
    },
    Currency {
        field: String,
    },
    Custom {
        name: String,
        fields: Vec<String>,
        check: CustomCheck,
    },
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtLeastOneOf { fields, .. } => write!(f, "AtLeastOneOf({fields:?})"),
            Self::Range { field, min, max } => write!(f, "Range({field}, {min:?}..{max:?})"),
            Self::Pattern { field, regex, .. } => write!(f, "Pattern({field}, {})", regex.as_str()),
            Self::OneOf { field, allowed, .. } => write!(f, "OneOf({field}, {allowed:?})"),
            Self::Currency { field } => write!(f, "Currency({field})"),
            Self::Custom { name, .. } => write!(f, "Custom({name})"),
        }
    }
}

impl Rule {
    pub fn at_least_one_of<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AtLeastOneOf {
            fields: fields.into_iter().map(Into::into).collect(),
            message: None,
        }
    }

    pub fn range(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self::Range {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn pattern(field: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Pattern {
            field: field.into(),
            regex: Regex::new(pattern)?,
            message: None,
        })
    }

    pub fn one_of<I, S>(field: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf {
            field: field.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
            case_insensitive: false,
            code: ErrorCode::PayloadValidationFailed,
        }
    }

    pub fn currency(field: impl Into<String>) -> Self {
        Self::Currency {
            field: field.into(),
        }
    }

    pub fn custom<F>(name: impl Into<String>, fields: &[&str], check: F) -> Self
    where
        F: Fn(&Payload) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        Self::Custom {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            check: Arc::new(check),
        }
    }

    /// Overrides the failure message for rules that carry one.
    pub fn with_message(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Self::AtLeastOneOf { message, .. } | Self::Pattern { message, .. } => {
                *message = Some(text.into());
            }
            _ => {}
        }
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        if let Self::OneOf {
            case_insensitive, ..
        } = &mut self
        {
            *case_insensitive = true;
        }
        self
    }

    pub fn with_code(mut self, new_code: ErrorCode) -> Self {
        if let Self::OneOf { code, .. } = &mut self {
            *code = new_code;
        }
        self
    }

    /// Payload paths this rule reads.
    pub fn referenced_fields(&self) -> Vec<&str> {
        match self {
            Self::AtLeastOneOf { fields, .. } | Self::Custom { fields, .. } => {
                fields.iter().map(String::as_str).collect()
            }
            Self::Range { field, .. }
            | Self::Pattern { field, .. }
            | Self::OneOf { field, .. }
            | Self::Currency { field } => vec![field.as_str()],
        }
    }

    pub fn check(&self, payload: &Payload) -> Result<(), ValidationError> {
        match self {
            Self::AtLeastOneOf { fields, message } => {
                if fields.iter().any(|f| payload.is_set(f)) {
                    return Ok(());
                }
                let text = message
                    .clone()
                    .unwrap_or_else(|| at_least_one_of_message(fields));
                Err(ValidationError::new(text))
            }
            Self::Range { field, min, max } => match payload.lookup(field) {
                Some(Value::Number(n)) => {
                    let v = n.as_f64().unwrap_or_default();
                    check_bounds(field, v, *min, *max)
                }
                _ => Ok(()),
            },
            Self::Pattern {
                field,
                regex,
                message,
            } => match payload.lookup(field).and_then(Value::as_str) {
                Some(s) if !regex.is_match(s) => Err(ValidationError::for_field(
                    field.as_str(),
                    message
                        .clone()
                        .unwrap_or_else(|| format!("{} is an invalid string.", preamble(field))),
                )),
                _ => Ok(()),
            },
            Self::OneOf {
                field,
                allowed,
                case_insensitive,
                code,
            } => match payload.lookup(field).and_then(Value::as_str) {
                Some(s) => {
                    let found = allowed.iter().any(|a| {
                        if *case_insensitive {
                            a.eq_ignore_ascii_case(s)
                        } else {
                            a == s
                        }
                    });
                    if found {
                        Ok(())
                    } else {
                        let values: Vec<Value> =
                            allowed.iter().map(|a| Value::String(a.clone())).collect();
                        Err(one_of_error(field, &values).with_code(*code))
                    }
                }
                None => Ok(()),
            },
            Self::Currency { field } => match payload.lookup(field).and_then(Value::as_str) {
                Some(code) if !currency::is_valid_currency(code) => Err(ValidationError::for_field(
                    field.as_str(),
                    format!("{code} is not a valid currency code."),
                )
                .with_code(ErrorCode::InvalidCurrencyCode)),
                _ => Ok(()),
            },
            Self::Custom { check, .. } => check(payload),
        }
    }
}

/// Fail-fast: the first failing rule in declaration order.
pub fn validate(payload: &Payload, rules: &[Rule]) -> Result<(), ValidationError> {
    rules.iter().try_for_each(|rule| rule.check(payload))
}

/// Every failing rule, for diagnostics.
pub fn validate_all(payload: &Payload, rules: &[Rule]) -> Vec<ValidationError> {
    rules.iter().filter_map(|r| r.check(payload).err()).collect()
}

// ─── Field constraints ─────────────────────────────────────────────────────

/// Checks declared choices, bounds, lengths, patterns and formats. Absent
/// values are skipped; requiredness is the resolver's concern.
pub fn check_constraints(
    schema: &FieldSchema,
    values: &ResolvedPayload,
) -> Result<(), ValidationError> {
    for spec in schema.fields() {
        if let Some(value) = values.get(&spec.key) {
            check_field(schema, spec, &spec.key, value)?;
        }
    }
    Ok(())
}

fn check_field(
    schema: &FieldSchema,
    spec: &FieldSpec,
    at: &str,
    value: &Value,
) -> Result<(), ValidationError> {
    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                check_scalar_or_object(schema, spec, &format!("{at}.{i}"), at, item)?;
            }
            Ok(())
        }
        other => check_scalar_or_object(schema, spec, at, at, other),
    }
}

/// `schema_path` omits array indices so nested patterns are found by their
/// declared path.
fn check_scalar_or_object(
    schema: &FieldSchema,
    spec: &FieldSpec,
    at: &str,
    schema_path: &str,
    value: &Value,
) -> Result<(), ValidationError> {
    if let Some(choices) = &spec.choices {
        if !spec.dynamic && !value.is_object() && !choices.iter().any(|c| &c.value == value) {
            let values: Vec<Value> = choices.iter().map(|c| c.value.clone()).collect();
            return Err(one_of_error(at, &values));
        }
    }

    let c = &spec.constraints;
    match value {
        Value::Number(n) => check_bounds(at, n.as_f64().unwrap_or_default(), c.min, c.max)?,
        Value::String(s) => {
            let len = s.chars().count();
            if let Some(min) = c.min_length.filter(|m| len < *m) {
                return Err(ValidationError::for_field(
                    at,
                    format!(
                        "{} should be {min} {} or more but it was {len} {}.",
                        preamble(at),
                        characters(min),
                        characters(len)
                    ),
                ));
            }
            if let Some(max) = c.max_length.filter(|m| len > *m) {
                return Err(ValidationError::for_field(
                    at,
                    format!(
                        "{} should be {max} {} or fewer but it was {len} {}.",
                        preamble(at),
                        characters(max),
                        characters(len)
                    ),
                ));
            }
            if let Some(regex) = schema.pattern(schema_path) {
                if !regex.is_match(s) {
                    return Err(ValidationError::for_field(
                        at,
                        format!("{} is an invalid string.", preamble(at)),
                    ));
                }
            }
            if let Some(format) = c.format {
                if !matches_format(format, s) {
                    return Err(ValidationError::for_field(
                        at,
                        format!(
                            "{} should be a valid {} string but it was not.",
                            preamble(at),
                            format.display_name()
                        ),
                    ));
                }
            }
        }
        Value::Object(map) => {
            for prop in &spec.properties {
                if let Some(v) = map.get(&prop.key) {
                    let child_at = format!("{at}.{}", prop.key);
                    let child_schema = format!("{schema_path}.{}", prop.key);
                    match v {
                        Value::Array(items) => {
                            for (i, item) in items.iter().enumerate() {
                                check_scalar_or_object(
                                    schema,
                                    prop,
                                    &format!("{child_at}.{i}"),
                                    &child_schema,
                                    item,
                                )?;
                            }
                        }
                        other => {
                            check_scalar_or_object(schema, prop, &child_at, &child_schema, other)?
                        }
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_bounds(
    at: &str,
    value: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<(), ValidationError> {
    if let Some(min) = min.filter(|m| value < *m) {
        return Err(ValidationError::for_field(
            at,
            format!(
                "{} should be equal to or greater than {}.",
                preamble(at),
                fmt_number(min)
            ),
        ));
    }
    if let Some(max) = max.filter(|m| value > *m) {
        return Err(ValidationError::for_field(
            at,
            format!(
                "{} should be equal to or less than {}.",
                preamble(at),
                fmt_number(max)
            ),
        ));
    }
    Ok(())
}

static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
static URI_REGEX: OnceLock<Regex> = OnceLock::new();
static UUID_REGEX: OnceLock<Regex> = OnceLock::new();
static HOSTNAME_REGEX: OnceLock<Regex> = OnceLock::new();

fn email_regex() -> &'static Regex {
    EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid email regex pattern")
    })
}

fn uri_regex() -> &'static Regex {
    URI_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:[^\s]+$").expect("Invalid URI regex pattern")
    })
}

fn uuid_regex() -> &'static Regex {
    UUID_REGEX.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("Invalid UUID regex pattern")
    })
}

fn hostname_regex() -> &'static Regex {
    HOSTNAME_REGEX.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?)*$",
        )
        .expect("Invalid hostname regex pattern")
    })
}

fn matches_format(format: Format, s: &str) -> bool {
    match format {
        Format::DateTime => DateTime::parse_from_rfc3339(s).is_ok(),
        Format::Email => email_regex().is_match(s),
        Format::Uri => uri_regex().is_match(s),
        Format::Uuid => uuid_regex().is_match(s),
        Format::Hostname => hostname_regex().is_match(s),
    }
}

// ─── Messages ──────────────────────────────────────────────────────────────

fn preamble(at: &str) -> String {
    format!("The value at /{}", at.replace('.', "/"))
}

fn characters(n: usize) -> &'static str {
    if n == 1 {
        "character"
    } else {
        "characters"
    }
}

fn fmt_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn humanize_list(items: &[String], conjunction: &str) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{a} {conjunction} {b}"),
        [rest @ .., last] => format!("{}, {conjunction} {last}", rest.join(", ")),
    }
}

fn one_of_error(at: &str, allowed: &[Value]) -> ValidationError {
    let rendered: Vec<String> = allowed.iter().map(Value::to_string).collect();
    ValidationError::for_field(
        at,
        format!(
            "{} should be one of: {}.",
            preamble(at),
            humanize_list(&rendered, "or")
        ),
    )
}

/// Message depends only on the field set, not on declaration order.
fn at_least_one_of_message(fields: &[String]) -> String {
    let mut sorted: Vec<String> = fields.to_vec();
    sorted.sort();
    sorted.dedup();
    format!(
        "At least one of {} is required.",
        humanize_list(&sorted, "or")
    )
}
