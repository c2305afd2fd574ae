//! Maps vendor responses onto the error taxonomy. Vendors disagree on where
//! they put status, code and message; extraction here is uniform so every
//! adapter surfaces the same shape.

use serde_json::Value;

use actionkit_core::{ActionError, ErrorCode};

use crate::transport::HttpResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Candidate for the OAuth refresh path.
    Unauthorized,
    Retryable,
    Terminal,
}

pub fn classify_status(status: u16) -> Outcome {
    match status {
        200..=299 => Outcome::Success,
        401 => Outcome::Unauthorized,
        408 | 423 | 429 | 500..=599 => Outcome::Retryable,
        _ => Outcome::Terminal,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    pub status: u16,
    pub code: String,
    pub message: String,
}

pub fn extract_error_details(response: &HttpResponse) -> ErrorDetails {
    let body = serde_json::from_str::<Value>(&response.body).ok();

    let status = body
        .as_ref()
        .and_then(|b| b.get("status").or_else(|| b.pointer("/error/status")))
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .filter(|s| (400..600).contains(s))
        .unwrap_or(response.status);

    let message = body
        .as_ref()
        .and_then(body_message)
        .or_else(|| {
            let text = response.body.trim();
            (!text.is_empty()).then(|| truncate(text, 512))
        })
        .unwrap_or_else(|| default_reason(status).to_string());

    let code = body
        .as_ref()
        .and_then(body_code)
        .unwrap_or_else(|| ErrorCode::from_http_status(status).as_str().to_string());

    ErrorDetails {
        status,
        code,
        message,
    }
}

fn body_message(body: &Value) -> Option<String> {
    [
        "/message",
        "/error/message",
        "/error_description",
        "/errors/0/message",
        "/error",
        "/detail",
    ]
    .iter()
    .find_map(|p| body.pointer(p).and_then(Value::as_str).filter(|s| !s.is_empty()))
    .map(str::to_string)
}

fn body_code(body: &Value) -> Option<String> {
    ["/code", "/error/code", "/errorCode", "/serviceErrorCode"]
        .iter()
        .find_map(|p| match body.pointer(p)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn default_reason(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        423 => "Locked",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown Error",
    }
}

/// Error for a non-2xx response, tagged by [`classify_status`].
pub fn error_from_response(response: &HttpResponse) -> ActionError {
    let details = extract_error_details(response);
    match classify_status(response.status) {
        Outcome::Unauthorized => ActionError::Authentication {
            message: details.message,
            code: ErrorCode::InvalidAuthentication,
        },
        Outcome::Retryable => ActionError::Retryable {
            message: details.message,
            status: details.status,
            retry_after: response
                .header("retry-after")
                .and_then(|v| v.trim().parse().ok()),
        },
        Outcome::Terminal | Outcome::Success => ActionError::Integration {
            message: details.message,
            code: details.code,
            status: details.status,
        },
    }
}
