//! Authentication error types.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// GoTrue error codes that indicate the server may succeed on a later attempt.
const RETRYABLE_ERROR_CODES: &[&str] = &[
    "request_timeout",
    "unexpected_failure",
    "hook_timeout",
    "hook_timeout_after_retry",
];

/// Structured error returned by the auth API for a non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status of the response.
    pub status: u16,
    /// Machine-readable error code (`error_code`, or the OAuth `error` field).
    pub code: Option<String>,
    /// Human-readable message.
    pub message: String,
}

/// Both body shapes the auth server produces: the current
/// `{code, error_code, msg}` and the OAuth-style `{error, error_description}`.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// Decode an error body. Returns `None` if the body is not a recognizable
    /// auth error payload.
    pub fn from_body(status: u16, body: &[u8]) -> Option<Self> {
        let parsed: ApiErrorBody = serde_json::from_slice(body).ok()?;
        let code = parsed.error_code.or_else(|| parsed.error.clone());
        let message = parsed
            .msg
            .or(parsed.message)
            .or(parsed.error_description)
            .or(parsed.error)?;

        Some(Self {
            status,
            code,
            message,
        })
    }

    /// True for server-side failures worth retrying with the same input.
    pub fn is_retryable(&self) -> bool {
        if self.status >= 500 || self.status == 408 || self.status == 429 {
            return true;
        }
        self.code
            .as_deref()
            .is_some_and(|code| RETRYABLE_ERROR_CODES.contains(&code))
    }

    /// Logout responses meaning the session is already gone server-side.
    pub fn is_already_signed_out(&self) -> bool {
        is_already_signed_out_status(self.status)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (HTTP {}, {})", self.message, self.status, code),
            None => write!(f, "{} (HTTP {})", self.message, self.status),
        }
    }
}

impl std::error::Error for ApiError {}

pub(crate) fn is_already_signed_out_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 404)
}

/// Terminal outcome of a token refresh, shared by every waiter of the
/// in-flight refresh task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Network or server hiccup; the stored session is kept.
    #[error("Token refresh failed (retryable): {0}")]
    Transient(String),

    /// The auth server rejected the refresh token.
    #[error("Token refresh rejected: {0}")]
    Rejected(ApiError),

    /// Non-retryable failure that did not come with an API error body.
    #[error("Token refresh failed: {0}")]
    Permanent(String),

    /// Retries stopped because the next backoff would overrun the retry budget.
    #[error("Token refresh gave up after {attempts} attempts: {last}")]
    RetryBudgetExhausted { attempts: u32, last: String },

    /// A sign-in or sign-out replaced the session while the refresh ran.
    #[error("Session changed while the refresh was in flight")]
    Superseded,
}

impl RefreshError {
    /// Classify a failed refresh attempt.
    pub fn classify(error: AuthError) -> Self {
        if error.is_transient() {
            return RefreshError::Transient(error.to_string());
        }
        match error {
            AuthError::Api(api) => RefreshError::Rejected(api),
            AuthError::Refresh(inner) => inner,
            other => RefreshError::Permanent(other.to_string()),
        }
    }

    /// Permanent failures invalidate the stored session.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RefreshError::Rejected(_) | RefreshError::Permanent(_))
    }

    pub fn is_transient(&self) -> bool {
        !self.is_permanent()
    }
}

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No session is stored for this client
    #[error("Auth session missing")]
    SessionMissing,

    /// Structured error returned by the auth API
    #[error("Auth API error: {0}")]
    Api(ApiError),

    /// Non-2xx response without a recognizable error body
    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// Token refresh failure
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// PKCE exchange attempted without a stored code verifier
    #[error("PKCE code verifier not found in storage")]
    MissingCodeVerifier,

    /// Malformed access token
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Callback URL without a usable session or code
    #[error("Invalid callback URL: {0}")]
    InvalidCallbackUrl(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] auth_storage::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Network unavailable (transient error, can retry)
    #[error("Network unavailable: {0}")]
    Network(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Network unavailable and timeouts
    /// - HTTP 5xx, 408 and 429 responses
    /// - Auth API error codes marked as retryable
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) => true,
            AuthError::Timeout => true,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() || e.is_request() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            AuthError::Api(api) => api.is_retryable(),
            AuthError::UnexpectedStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            AuthError::Refresh(refresh) => refresh.is_transient(),
            _ => false,
        }
    }

    /// True when the caller has no session to work with.
    pub fn is_session_missing(&self) -> bool {
        matches!(self, AuthError::SessionMissing)
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Api(api) => Some(api.status),
            AuthError::UnexpectedStatus { status, .. } => Some(*status),
            AuthError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
