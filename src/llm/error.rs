//! Provider error types with retry classification.
//!
//! Every backend failure is mapped onto a closed set of kinds. Only rate limits
//! and network failures are retried; everything else aborts the call at once.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error from a provider call.
#[derive(Debug)]
pub struct ProviderError {
    /// The kind of error
    pub kind: ProviderErrorKind,
    /// Human-readable description
    pub message: String,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    /// Server-suggested delay (Retry-After header)
    pub retry_after: Option<Duration>,
    /// Underlying failure, if any
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    /// Create an error of an explicit kind.
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            retry_after: None,
            source: None,
        }
    }

    /// Create an error whose kind is inferred from its description.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ProviderErrorKind::classify(None, &message), message)
    }

    /// Create an error from a non-success HTTP response.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        Self {
            kind: ProviderErrorKind::classify(Some(status), &message),
            message,
            status_code: Some(status),
            retry_after,
            source: None,
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Network, message)
    }

    /// Create the error reported when an attempt exceeds its time budget.
    pub fn timeout(after: Duration) -> Self {
        Self::network(format!("Request timed out after {:?}", after))
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Check if this error should be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        let error = if e.is_timeout() {
            ProviderError::network(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            ProviderError::network(format!("Connection failed: {}", e))
        } else if let Some(status) = e.status() {
            ProviderError::from_status(status.as_u16(), e.to_string(), None)
        } else if e.is_decode() {
            ProviderError::new(ProviderErrorKind::ProviderInternal, format!("Malformed response: {}", e))
        } else {
            ProviderError::classified(format!("Request failed: {}", e))
        };
        error.with_source(e)
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Classification of provider errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Bad or missing credentials (401/403) - permanent
    Auth,
    /// Rate limited (429) or overloaded - transient, retry with backoff
    RateLimit,
    /// Malformed request, context too long (400/413/422) - permanent
    InvalidRequest,
    /// Model does not exist or is not served (404) - permanent
    ModelUnavailable,
    /// Connection failure or timeout - transient
    Network,
    /// Backend failed internally (5xx) - permanent
    ProviderInternal,
    /// Anything unrecognised - permanent
    Unknown,
}

impl ProviderErrorKind {
    /// Check if this error kind is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderErrorKind::RateLimit | ProviderErrorKind::Network)
    }

    /// Infer the kind from an optional HTTP status and the failure description.
    ///
    /// The status wins when it is decisive; otherwise the description is matched
    /// against known phrases.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        if let Some(kind) = status.and_then(classify_http_status) {
            return kind;
        }
        classify_message(message)
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorKind::Auth => write!(f, "Authentication error"),
            ProviderErrorKind::RateLimit => write!(f, "Rate limited"),
            ProviderErrorKind::InvalidRequest => write!(f, "Invalid request"),
            ProviderErrorKind::ModelUnavailable => write!(f, "Model unavailable"),
            ProviderErrorKind::Network => write!(f, "Network error"),
            ProviderErrorKind::ProviderInternal => write!(f, "Provider error"),
            ProviderErrorKind::Unknown => write!(f, "Unknown error"),
        }
    }
}

/// Parse HTTP status code into error kind.
///
/// Returns `None` for statuses that say nothing useful on their own.
pub fn classify_http_status(status: u16) -> Option<ProviderErrorKind> {
    match status {
        401 | 403 => Some(ProviderErrorKind::Auth),
        429 | 529 => Some(ProviderErrorKind::RateLimit),
        404 => Some(ProviderErrorKind::ModelUnavailable),
        400 | 413 | 422 => Some(ProviderErrorKind::InvalidRequest),
        408 | 502 | 504 => Some(ProviderErrorKind::Network),
        500..=599 => Some(ProviderErrorKind::ProviderInternal),
        _ => None,
    }
}

/// Parse the Retry-After header (seconds form) if present.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Pull the human-readable message out of an error response body.
///
/// Handles `{"error": {"message": ...}}`, `{"error": "..."}` and
/// `{"message": ...}`; anything else is returned verbatim.
pub(crate) fn error_message_from_body(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    let message = match value.get("error") {
        Some(serde_json::Value::String(s)) => Some(s.as_str()),
        Some(error) => error.get("message").and_then(|m| m.as_str()),
        None => value.get("message").and_then(|m| m.as_str()),
    };
    message
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Build an error from a non-success HTTP response.
pub(crate) async fn error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    let message = error_message_from_body(&body);
    let message = if message.is_empty() {
        format!("HTTP {}", status)
    } else {
        message
    };
    ProviderError::from_status(status, message, retry_after)
}

fn classify_message(message: &str) -> ProviderErrorKind {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["api key", "api_key", "unauthorized", "authentication", "permission denied", "forbidden"]) {
        ProviderErrorKind::Auth
    } else if has(&["rate limit", "rate_limit", "too many requests", "quota", "overloaded"]) {
        ProviderErrorKind::RateLimit
    } else if has(&["model not found", "does not exist", "no such model", "model_not_found", "not available"]) {
        ProviderErrorKind::ModelUnavailable
    } else if has(&["timeout", "timed out", "connection", "econnreset", "econnrefused", "network", "dns"]) {
        ProviderErrorKind::Network
    } else if has(&["invalid", "bad request", "context length", "too long", "malformed"]) {
        ProviderErrorKind::InvalidRequest
    } else if has(&["internal server error", "internal error", "server error"]) {
        ProviderErrorKind::ProviderInternal
    } else {
        ProviderErrorKind::Unknown
    }
}
