//! Sends one authenticated request and classifies the answer. Under OAuth2
//! a 401 gets exactly one refresh and one retry; nothing else loops here.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use actionkit_core::{ActionError, ActionResult, ErrorCode, RuntimeContext};

use crate::auth::{AuthConfig, OAuth2Credentials, RefreshedToken, TokenRefresher};
use crate::classify::{classify_status, error_from_response, Outcome};
use crate::middleware::{DispatchHook, DispatchOutcome, OperationContext, Pipeline};
use crate::transport::{HttpRequest, HttpResponse, Transport};

const REQUEST_ID_HEADERS: &[&str] = &["x-request-id", "request-id", "x-amzn-requestid", "x-li-uuid"];

/// Normalized result of a delivered request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResult {
    pub status: u16,
    pub body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Set when the call only succeeded after a token refresh. The host is
    /// expected to persist it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refreshed_token: Option<RefreshedToken>,
    /// Number of events carried by the request.
    pub event_count: usize,
}

impl DispatchResult {
    fn from_response(response: &HttpResponse, refreshed_token: Option<RefreshedToken>) -> Self {
        Self {
            status: response.status,
            body: response.body_value(),
            request_id: REQUEST_ID_HEADERS
                .iter()
                .find_map(|h| response.header(h))
                .map(str::to_string),
            refreshed_token,
            event_count: 1,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    pipeline: Pipeline,
    runtime: RuntimeContext,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            refresher: None,
            pipeline: Pipeline::standard(),
            runtime: RuntimeContext::default(),
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Appends a hook after the existing ones.
    pub fn with_hook(mut self, hook: Arc<dyn DispatchHook>) -> Self {
        self.pipeline = self.pipeline.with(hook);
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeContext) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn runtime(&self) -> &RuntimeContext {
        &self.runtime
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub async fn dispatch(
        &self,
        ctx: &OperationContext,
        request: HttpRequest,
        auth: &AuthConfig,
    ) -> ActionResult<DispatchResult> {
        let response = self.send(ctx, &request, auth).await?;

        match classify_status(response.status) {
            Outcome::Success => Ok(DispatchResult::from_response(&response, None)),
            Outcome::Unauthorized => match (auth.oauth(), &self.refresher) {
                (Some(credentials), Some(refresher)) => {
                    self.refresh_and_retry(ctx, &request, auth, credentials, refresher.as_ref())
                        .await
                }
                _ => Err(error_from_response(&response)),
            },
            Outcome::Retryable | Outcome::Terminal => Err(error_from_response(&response)),
        }
    }

    async fn refresh_and_retry(
        &self,
        ctx: &OperationContext,
        request: &HttpRequest,
        auth: &AuthConfig,
        credentials: &OAuth2Credentials,
        refresher: &dyn TokenRefresher,
    ) -> ActionResult<DispatchResult> {
        info!(
            operation_id = %ctx.operation_id,
            destination = %ctx.destination,
            "access token rejected, refreshing"
        );

        let token = refresher.refresh(credentials).await.map_err(|e| {
            warn!(operation_id = %ctx.operation_id, error = %e, "token refresh failed");
            match e {
                ActionError::Authentication { .. } => e,
                other => ActionError::Authentication {
                    message: format!("Failed to refresh access token: {other}"),
                    code: ErrorCode::OauthRefreshFailed,
                },
            }
        })?;

        let refreshed = auth.with_refreshed(&token);
        let response = self.send(&ctx.next_attempt(), request, &refreshed).await?;

        if response.is_success() {
            Ok(DispatchResult::from_response(&response, Some(token)))
        } else {
            Err(error_from_response(&response))
        }
    }

    async fn send(
        &self,
        ctx: &OperationContext,
        request: &HttpRequest,
        auth: &AuthConfig,
    ) -> ActionResult<HttpResponse> {
        let mut decorated = request.clone();
        auth.decorate(&mut decorated);

        self.pipeline.before(ctx, &decorated);
        let started = Instant::now();
        let result = self.transport.send(decorated).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(response) => self
                .pipeline
                .after(ctx, &DispatchOutcome::Response(response), elapsed),
            Err(err) => self.pipeline.after(ctx, &DispatchOutcome::Failed(err), elapsed),
        }

        result.map_err(ActionError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Operation;
    use crate::testing::{MockTransport, StaticRefresher};
    use crate::transport::TransportError;
    use serde_json::json;

    fn ctx() -> OperationContext {
        OperationContext::new("test", "action", Operation::Perform)
    }

    fn oauth() -> AuthConfig {
        AuthConfig::OAuth2(OAuth2Credentials {
            access_token: "stale".into(),
            refresh_token: Some("r-1".into()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_success_captures_request_id() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(
            HttpResponse::json(202, &json!({ "ok": true })).with_header("X-Request-Id", "req-9"),
        );
        let dispatcher = Dispatcher::new(transport.clone());

        let result = dispatcher
            .dispatch(&ctx(), HttpRequest::post("https://api.example.com/e"), &AuthConfig::bearer("t"))
            .await
            .unwrap();

        assert_eq!(result.status, 202);
        assert_eq!(result.request_id.as_deref(), Some("req-9"));
        assert_eq!(result.body, json!({ "ok": true }));
        assert_eq!(
            transport.requests()[0].header_value("authorization"),
            Some("Bearer t")
        );
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_once_and_retries() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse::new(401, ""));
        transport.push_response(HttpResponse::json(200, &json!({})));
        let refresher = Arc::new(StaticRefresher::new("fresh"));
        let dispatcher = Dispatcher::new(transport.clone()).with_refresher(refresher.clone());

        let result = dispatcher
            .dispatch(&ctx(), HttpRequest::post("https://api.example.com/e"), &oauth())
            .await
            .unwrap();

        assert_eq!(transport.call_count(), 2);
        assert_eq!(refresher.calls(), 1);
        let requests = transport.requests();
        assert_eq!(requests[0].header_value("authorization"), Some("Bearer stale"));
        assert_eq!(requests[1].header_value("authorization"), Some("Bearer fresh"));
        assert_eq!(result.refreshed_token.unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_surfaced() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse::new(401, ""));
        transport.push_response(HttpResponse::json(401, &json!({ "message": "still no" })));
        let dispatcher = Dispatcher::new(transport.clone())
            .with_refresher(Arc::new(StaticRefresher::new("fresh")));

        let err = dispatcher
            .dispatch(&ctx(), HttpRequest::post("https://api.example.com/e"), &oauth())
            .await
            .unwrap_err();

        assert_eq!(transport.call_count(), 2);
        assert_eq!(err.status(), 401);
        assert_eq!(err.to_string(), "still no");
    }

    #[tokio::test]
    async fn test_unauthorized_without_oauth_does_not_refresh() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse::new(401, ""));
        let refresher = Arc::new(StaticRefresher::new("fresh"));
        let dispatcher = Dispatcher::new(transport.clone()).with_refresher(refresher.clone());

        let err = dispatcher
            .dispatch(&ctx(), HttpRequest::post("https://api.example.com/e"), &AuthConfig::bearer("t"))
            .await
            .unwrap_err();

        assert_eq!(transport.call_count(), 1);
        assert_eq!(refresher.calls(), 0);
        assert_eq!(err.code(), "INVALID_AUTHENTICATION");
    }

    #[tokio::test]
    async fn test_failed_refresh_stops_without_retry() {
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse::new(401, ""));
        let dispatcher = Dispatcher::new(transport.clone())
            .with_refresher(Arc::new(StaticRefresher::failing()));

        let err = dispatcher
            .dispatch(&ctx(), HttpRequest::post("https://api.example.com/e"), &oauth())
            .await
            .unwrap_err();

        assert_eq!(transport.call_count(), 1);
        assert_eq!(err.code(), "REFRESH_TOKEN_EXPIRED");
    }

    #[tokio::test]
    async fn test_transport_timeout_is_retryable() {
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::Timeout("deadline".into()));
        let dispatcher = Dispatcher::new(transport);

        let err = dispatcher
            .dispatch(&ctx(), HttpRequest::get("https://api.example.com"), &AuthConfig::None)
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.status(), 408);
    }
}
