//! Batch envelopes and per-element outcomes.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use actionkit_core::ActionError;

use crate::dispatcher::DispatchResult;

type EnvelopeFn = Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>;

/// How N single-event bodies are combined into one vendor request body.
#[derive(Clone)]
pub enum BatchEnvelope {
    /// `[a, b, c]`
    Array,
    /// `{ "<key>": [a, b, c], ...extra }`
    Wrapped { key: String, extra: Map<String, Value> },
    Custom(EnvelopeFn),
}

impl fmt::Debug for BatchEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array => f.write_str("Array"),
            Self::Wrapped { key, extra } => f
                .debug_struct("Wrapped")
                .field("key", key)
                .field("extra", extra)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl BatchEnvelope {
    pub fn wrapped(key: impl Into<String>) -> Self {
        Self::Wrapped {
            key: key.into(),
            extra: Map::new(),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Value + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Merges bodies that are each already wrapped as `{ "<key>": [...] }`
    /// into one wrapper, concatenating the inner arrays.
    pub fn concat(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::custom(move |items| {
            let merged: Vec<Value> = items
                .into_iter()
                .flat_map(|item| match item {
                    Value::Object(mut map) => match map.remove(&key) {
                        Some(Value::Array(inner)) => inner,
                        Some(other) => vec![other],
                        None => Vec::new(),
                    },
                    other => vec![other],
                })
                .collect();
            let mut out = Map::new();
            out.insert(key.clone(), Value::Array(merged));
            Value::Object(out)
        })
    }

    pub fn with_extra(mut self, name: impl Into<String>, value: Value) -> Self {
        if let Self::Wrapped { extra, .. } = &mut self {
            extra.insert(name.into(), value);
        }
        self
    }

    pub fn wrap(&self, items: Vec<Value>) -> Value {
        match self {
            Self::Array => Value::Array(items),
            Self::Wrapped { key, extra } => {
                let mut out = Map::new();
                out.insert(key.clone(), Value::Array(items));
                for (k, v) in extra {
                    out.insert(k.clone(), v.clone());
                }
                Value::Object(out)
            }
            Self::Custom(f) => f(items),
        }
    }
}

/// What happened to one input event of a batch.
#[derive(Debug)]
pub enum ElementOutcome {
    /// Carried by `dispatches[dispatch]`.
    Delivered { dispatch: usize },
    Failed(ActionError),
}

impl ElementOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn error(&self) -> Option<&ActionError> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Delivered { .. } => None,
        }
    }
}

/// Result of `perform_batch`: the calls that were made plus one outcome per
/// input event, in input order.
#[derive(Debug, Default)]
pub struct BatchResponse {
    pub dispatches: Vec<DispatchResult>,
    pub outcomes: Vec<ElementOutcome>,
}

impl BatchResponse {
    pub fn delivered_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.delivered_count()
    }

    /// Most recent token obtained by a refresh during the batch.
    pub fn refreshed_token(&self) -> Option<&crate::auth::RefreshedToken> {
        self.dispatches
            .iter()
            .rev()
            .find_map(|d| d.refreshed_token.as_ref())
    }
}

/// Folds the errors of a batch where nothing was delivered into one. The
/// first non-retryable error wins; otherwise the first error is used.
pub fn aggregate_failures(errors: Vec<ActionError>, total: usize) -> ActionError {
    let failed = errors.len();
    fold_failures(errors, failed, total)
}

/// A failed envelope call fails every element: the accepted ones with
/// `send_error`, the rest with their own validation errors.
pub fn aggregate_envelope_failure(
    send_error: ActionError,
    rejected: Vec<ActionError>,
    total: usize,
) -> ActionError {
    let mut errors = Vec::with_capacity(rejected.len() + 1);
    errors.push(send_error);
    errors.extend(rejected);
    fold_failures(errors, total, total)
}

fn fold_failures(errors: Vec<ActionError>, failed: usize, total: usize) -> ActionError {
    let pick = errors
        .iter()
        .position(|e| !e.is_retryable())
        .unwrap_or(0);
    let Some(representative) = errors.into_iter().nth(pick) else {
        return ActionError::Config("batch contained no events".to_string());
    };
    annotate(representative, &format!(" ({failed} of {total} batch elements failed)"))
}

fn annotate(err: ActionError, suffix: &str) -> ActionError {
    match err {
        ActionError::Validation(mut v) => {
            v.message.push_str(suffix);
            ActionError::Validation(v)
        }
        ActionError::Authentication { message, code } => ActionError::Authentication {
            message: message + suffix,
            code,
        },
        ActionError::Integration {
            message,
            code,
            status,
        } => ActionError::Integration {
            message: message + suffix,
            code,
            status,
        },
        ActionError::Retryable {
            message,
            status,
            retry_after,
        } => ActionError::Retryable {
            message: message + suffix,
            status,
            retry_after,
        },
        ActionError::Config(message) => ActionError::Config(message + suffix),
        other @ (ActionError::Serialization(_) | ActionError::Internal(_)) => {
            ActionError::Internal(anyhow::anyhow!("{other}{suffix}"))
        }
    }
}
