//! In-process doubles for the network boundary. Used by this crate's tests
//! and by adapter crates that need call-count assertions without sockets.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use actionkit_core::{ActionError, ActionResult, ErrorCode};

use crate::auth::{OAuth2Credentials, RefreshedToken, TokenRefresher};
use crate::middleware::{DispatchHook, DispatchOutcome, OperationContext};
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Replays queued responses in order and records every request it sees.
/// Once the queue is empty it answers `200 {}`.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    pub fn push_error(&self, error: TransportError) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::json(200, &json!({}))))
    }
}

/// Refresher that hands out a fixed token, or always fails with
/// `REFRESH_TOKEN_EXPIRED`.
pub struct StaticRefresher {
    access_token: Option<String>,
    calls: AtomicUsize,
}

impl StaticRefresher {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            access_token: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for StaticRefresher {
    async fn refresh(&self, _credentials: &OAuth2Credentials) -> ActionResult<RefreshedToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.access_token {
            Some(token) => Ok(RefreshedToken {
                access_token: token.clone(),
                refresh_token: None,
            }),
            None => Err(ActionError::Authentication {
                message: "Failed to refresh access token".to_string(),
                code: ErrorCode::RefreshTokenExpired,
            }),
        }
    }
}

/// Appends `name:before` and `name:after:<outcome>` to a shared log.
pub struct RecordingHook {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingHook {
    pub fn shared_log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn new(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self { name, log }
    }
}

impl DispatchHook for RecordingHook {
    fn name(&self) -> &'static str {
        self.name
    }

    fn before_request(&self, _ctx: &OperationContext, _request: &HttpRequest) {
        self.log.lock().push(format!("{}:before", self.name));
    }

    fn after_response(&self, _ctx: &OperationContext, outcome: &DispatchOutcome<'_>, _elapsed: Duration) {
        self.log
            .lock()
            .push(format!("{}:after:{}", self.name, outcome.label()));
    }
}
