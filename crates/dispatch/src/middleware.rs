//! Instrumentation around each outbound call, as an explicit ordered list
//! of hooks. `before_request` runs in list order and `after_response` in
//! reverse, so the first hook wraps all the others.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::{classify_status, Outcome};
use crate::transport::{HttpRequest, HttpResponse, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Perform,
    PerformBatch,
    ListChoices,
    SendMessage,
}

impl Operation {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Perform => "perform",
            Self::PerformBatch => "perform_batch",
            Self::ListChoices => "list_choices",
            Self::SendMessage => "send_message",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation_id: Uuid,
    pub destination: String,
    pub action: String,
    pub operation: Operation,
    /// 1 for the first call, 2 for the post-refresh retry.
    pub attempt: u32,
}

impl OperationContext {
    pub fn new(destination: impl Into<String>, action: impl Into<String>, operation: Operation) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            destination: destination.into(),
            action: action.into(),
            operation,
            attempt: 1,
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

pub enum DispatchOutcome<'a> {
    Response(&'a HttpResponse),
    Failed(&'a TransportError),
}

impl DispatchOutcome<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Response(r) => match classify_status(r.status) {
                Outcome::Success => "success",
                Outcome::Unauthorized => "unauthorized",
                Outcome::Retryable => "retryable",
                Outcome::Terminal => "rejected",
            },
            Self::Failed(_) => "transport_error",
        }
    }
}

pub trait DispatchHook: Send + Sync {
    fn name(&self) -> &'static str;

    fn before_request(&self, _ctx: &OperationContext, _request: &HttpRequest) {}

    fn after_response(&self, _ctx: &OperationContext, _outcome: &DispatchOutcome<'_>, _elapsed: Duration) {}
}

#[derive(Clone, Default)]
pub struct Pipeline {
    hooks: Vec<Arc<dyn DispatchHook>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracing then metrics.
    pub fn standard() -> Self {
        Self::new()
            .with(Arc::new(TracingHook))
            .with(Arc::new(MetricsHook))
    }

    pub fn with(mut self, hook: Arc<dyn DispatchHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    pub fn before(&self, ctx: &OperationContext, request: &HttpRequest) {
        for hook in &self.hooks {
            hook.before_request(ctx, request);
        }
    }

    pub fn after(&self, ctx: &OperationContext, outcome: &DispatchOutcome<'_>, elapsed: Duration) {
        for hook in self.hooks.iter().rev() {
            hook.after_response(ctx, outcome, elapsed);
        }
    }
}

// ─── Built-in hooks ────────────────────────────────────────────────────────

pub struct TracingHook;

impl DispatchHook for TracingHook {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn before_request(&self, ctx: &OperationContext, request: &HttpRequest) {
        debug!(
            operation_id = %ctx.operation_id,
            destination = %ctx.destination,
            action = %ctx.action,
            operation = ctx.operation.display_name(),
            attempt = ctx.attempt,
            method = request.method.as_str(),
            url = %request.url,
            "dispatching request"
        );
    }

    fn after_response(&self, ctx: &OperationContext, outcome: &DispatchOutcome<'_>, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        match outcome {
            DispatchOutcome::Response(r) if r.is_success() => info!(
                operation_id = %ctx.operation_id,
                destination = %ctx.destination,
                action = %ctx.action,
                status = r.status,
                elapsed_ms,
                "request delivered"
            ),
            DispatchOutcome::Response(r) => warn!(
                operation_id = %ctx.operation_id,
                destination = %ctx.destination,
                action = %ctx.action,
                status = r.status,
                elapsed_ms,
                "vendor rejected request"
            ),
            DispatchOutcome::Failed(e) => warn!(
                operation_id = %ctx.operation_id,
                destination = %ctx.destination,
                action = %ctx.action,
                error = %e,
                elapsed_ms,
                "request failed before a response"
            ),
        }
    }
}

pub struct MetricsHook;

impl DispatchHook for MetricsHook {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn after_response(&self, ctx: &OperationContext, outcome: &DispatchOutcome<'_>, elapsed: Duration) {
        metrics::counter!(
            "actionkit.dispatch.requests",
            "destination" => ctx.destination.clone(),
            "action" => ctx.action.clone(),
            "outcome" => outcome.label()
        )
        .increment(1);
        metrics::histogram!(
            "actionkit.dispatch.duration_ms",
            "destination" => ctx.destination.clone()
        )
        .record(elapsed.as_secs_f64() * 1000.0);
    }
}
