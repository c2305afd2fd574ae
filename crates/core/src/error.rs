use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ActionResult<T> = Result<T, ActionError>;

/// Stable machine-readable error codes. Hosts should match on these rather
/// than on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Domain codes
    PayloadValidationFailed,
    InvalidCurrencyCode,
    InvalidAuthentication,
    RefreshTokenExpired,
    OauthRefreshFailed,
    RetryableError,
    SelfTimeout,
    // HTTP status names
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    RequestTimeout,
    Conflict,
    Gone,
    PayloadTooLarge,
    UnprocessableEntity,
    Locked,
    TooManyRequests,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    UnknownError,
}

impl ErrorCode {
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            402 => Self::PaymentRequired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            408 => Self::RequestTimeout,
            409 => Self::Conflict,
            410 => Self::Gone,
            413 => Self::PayloadTooLarge,
            422 => Self::UnprocessableEntity,
            423 => Self::Locked,
            429 => Self::TooManyRequests,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            _ => Self::UnknownError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PayloadValidationFailed => "PAYLOAD_VALIDATION_FAILED",
            Self::InvalidCurrencyCode => "INVALID_CURRENCY_CODE",
            Self::InvalidAuthentication => "INVALID_AUTHENTICATION",
            Self::RefreshTokenExpired => "REFRESH_TOKEN_EXPIRED",
            Self::OauthRefreshFailed => "OAUTH_REFRESH_FAILED",
            Self::RetryableError => "RETRYABLE_ERROR",
            Self::SelfTimeout => "SELF_TIMEOUT",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::PaymentRequired => "PAYMENT_REQUIRED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::RequestTimeout => "REQUEST_TIMEOUT",
            Self::Conflict => "CONFLICT",
            Self::Gone => "GONE",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::UnprocessableEntity => "UNPROCESSABLE_ENTITY",
            Self::Locked => "LOCKED",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::BadGateway => "BAD_GATEWAY",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::GatewayTimeout => "GATEWAY_TIMEOUT",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload rejected before any network call. Terminal for the event (or
/// batch element) that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: ErrorCode::PayloadValidationFailed,
            field: None,
        }
    }

    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: ErrorCode::PayloadValidationFailed,
            field: Some(field.into()),
        }
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    /// `The root value is missing the required field 'email'.`
    pub fn missing_field(key: &str) -> Self {
        Self::for_field(
            key,
            format!("The root value is missing the required field '{key}'."),
        )
    }

    /// Missing property inside an object field, e.g.
    /// `The value at /user is missing the required field 'email'.`
    pub fn missing_property(parent: &str, key: &str) -> Self {
        Self::for_field(
            format!("{parent}.{key}"),
            format!(
                "The value at /{} is missing the required field '{key}'.",
                parent.replace('.', "/")
            ),
        )
    }

    /// `The value at /price should be a number but it was string.`
    pub fn wrong_type(key: &str, expected: &str, actual: &str) -> Self {
        let article = if expected.starts_with(['a', 'e', 'i', 'o', 'u']) {
            "an"
        } else {
            "a"
        };
        Self::for_field(
            key,
            format!(
                "The value at /{} should be {article} {expected} but it was {actual}.",
                key.replace('.', "/")
            ),
        )
    }
}

#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{message}")]
    Authentication { message: String, code: ErrorCode },

    #[error("{message}")]
    Integration {
        message: String,
        code: String,
        status: u16,
    },

    #[error("{message}")]
    Retryable {
        message: String,
        status: u16,
        retry_after: Option<u64>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ActionError {
    pub fn invalid_authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            code: ErrorCode::InvalidAuthentication,
        }
    }

    pub fn retryable(message: impl Into<String>, status: u16) -> Self {
        Self::Retryable {
            message: message.into(),
            status,
            retry_after: None,
        }
    }

    /// HTTP-equivalent status reported to the host.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Authentication { .. } => 401,
            Self::Integration { status, .. } | Self::Retryable { status, .. } => *status,
            Self::Config(_) | Self::Serialization(_) | Self::Internal(_) => 500,
        }
    }

    pub fn code(&self) -> String {
        match self {
            Self::Validation(e) => e.code.as_str().to_string(),
            Self::Authentication { code, .. } => code.as_str().to_string(),
            Self::Integration { code, .. } => code.clone(),
            Self::Retryable { .. } => ErrorCode::RetryableError.as_str().to_string(),
            Self::Config(_) | Self::Serialization(_) | Self::Internal(_) => {
                ErrorCode::UnknownError.as_str().to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Retryable { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
