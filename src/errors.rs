use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Convenience alias for fallible SDK results.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Ordered key/value metadata attached to an error (method, path, request id, ...).
///
/// Keys are kept sorted so the rendered form is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext(BTreeMap<String, String>);

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Structured failure surfaced for an API response or transport problem.
///
/// Renders as `"[CODE] message (HTTP S; Context: k=v, ...)"`, dropping the
/// segments that are unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiFailure {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
    pub context: ErrorContext,
}

impl ApiFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "[{code}] ")?;
        }
        write!(f, "{}", self.message)?;
        match (self.status, self.context.is_empty()) {
            (Some(status), false) => write!(f, " (HTTP {status}; Context: {})", self.context),
            (Some(status), true) => write!(f, " (HTTP {status})"),
            (None, false) => write!(f, " (Context: {})", self.context),
            (None, true) => Ok(()),
        }
    }
}

/// Unified error type surfaced by the SDK.
#[derive(Debug, Error)]
pub enum Error {
    /// Credential or tuning problem detected before any request was sent.
    #[error("{0}")]
    Config(String),

    /// Transport-level failure (DNS, TLS, connect, deadline) with no HTTP response.
    #[error("{failure}")]
    Connection {
        failure: ApiFailure,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// HTTP 401.
    #[error("{0}")]
    Unauthorized(ApiFailure),

    /// HTTP 429, surfaced after the retry budget is spent.
    #[error("{0}")]
    RateLimited(ApiFailure),

    /// HTTP 404 with canonical code `MODEL_NOT_FOUND`.
    #[error("{0}")]
    ModelNotFound(ApiFailure),

    /// HTTP 404 with canonical code `CHARACTER_NOT_FOUND`.
    #[error("{0}")]
    CharacterNotFound(ApiFailure),

    /// Any other 4xx.
    #[error("{0}")]
    InvalidRequest(ApiFailure),

    /// 5xx that survived the retry policy.
    #[error("{0}")]
    Server(ApiFailure),

    /// An async job exceeded its wait budget.
    #[error("{0}")]
    Timeout(ApiFailure),

    /// Body was not valid JSON where JSON was required, or an SSE frame was malformed.
    #[error("{failure}")]
    Decode {
        failure: ApiFailure,
        #[source]
        source: Option<serde_json::Error>,
    },
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub(crate) fn connection(
        message: impl Into<String>,
        context: ErrorContext,
        source: Option<reqwest::Error>,
    ) -> Self {
        Error::Connection {
            failure: ApiFailure::new(message).with_context(context),
            source,
        }
    }

    pub(crate) fn decode(
        message: impl Into<String>,
        preview: &str,
        source: Option<serde_json::Error>,
    ) -> Self {
        Error::Decode {
            failure: ApiFailure::new(message)
                .with_context(ErrorContext::new().with("preview", truncate_preview(preview))),
            source,
        }
    }

    pub(crate) fn timeout(message: impl Into<String>, context: ErrorContext) -> Self {
        Error::Timeout(ApiFailure::new(message).with_context(context))
    }

    /// HTTP status attached to this error, when one is known.
    pub fn status(&self) -> Option<u16> {
        self.failure().and_then(|f| f.status)
    }

    /// Canonical error code returned by the service, when one is known.
    pub fn code(&self) -> Option<&str> {
        self.failure().and_then(|f| f.code.as_deref())
    }

    /// Context metadata attached to this error.
    pub fn context(&self) -> Option<&ErrorContext> {
        self.failure().map(|f| &f.context)
    }

    /// `Retry-After` hint carried by a rate-limit error, in seconds.
    pub fn retry_after(&self) -> Option<u64> {
        self.context()
            .and_then(|ctx| ctx.get("retry_after"))
            .and_then(|v| v.parse().ok())
    }

    /// True for failures that originate server-side (`Server` and `Timeout`).
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Server(_) | Error::Timeout(_))
    }

    fn failure(&self) -> Option<&ApiFailure> {
        match self {
            Error::Config(_) => None,
            Error::Connection { failure, .. } | Error::Decode { failure, .. } => Some(failure),
            Error::Unauthorized(f)
            | Error::RateLimited(f)
            | Error::ModelNotFound(f)
            | Error::CharacterNotFound(f)
            | Error::InvalidRequest(f)
            | Error::Server(f)
            | Error::Timeout(f) => Some(f),
        }
    }
}

const PREVIEW_LIMIT: usize = 200;

pub(crate) fn truncate_preview(data: &str) -> String {
    if data.len() <= PREVIEW_LIMIT {
        return data.to_string();
    }
    let mut end = PREVIEW_LIMIT;
    while !data.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes total)", &data[..end], data.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_code_status_and_context() {
        let failure = ApiFailure::new("rate limit exceeded")
            .with_status(429)
            .with_code("RATE_LIMIT_EXCEEDED")
            .with_context(
                ErrorContext::new()
                    .with("method", "GET")
                    .with("path", "models")
                    .with("retry_after", "2"),
            );
        assert_eq!(
            failure.to_string(),
            "[RATE_LIMIT_EXCEEDED] rate limit exceeded (HTTP 429; Context: method=GET, path=models, retry_after=2)"
        );
    }

    #[test]
    fn omits_unknown_segments() {
        assert_eq!(ApiFailure::new("boom").to_string(), "boom");
        assert_eq!(
            ApiFailure::new("boom").with_status(500).to_string(),
            "boom (HTTP 500)"
        );
        assert_eq!(
            ApiFailure::new("boom")
                .with_context(ErrorContext::new().with("reason", "deadline"))
                .to_string(),
            "boom (Context: reason=deadline)"
        );
    }

    #[test]
    fn context_keys_sort_deterministically() {
        let ctx = ErrorContext::new()
            .with("path", "models")
            .with("method", "GET");
        assert_eq!(ctx.to_string(), "method=GET, path=models");
    }

    #[test]
    fn retry_after_accessor_reads_context() {
        let err = Error::RateLimited(
            ApiFailure::new("slow down")
                .with_status(429)
                .with_context(ErrorContext::new().with("retry_after", "7")),
        );
        assert_eq!(err.retry_after(), Some(7));
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        let preview = truncate_preview(&long);
        assert!(preview.len() < long.len());
        assert!(preview.ends_with("bytes total)"));
    }

    #[test]
    fn timeout_counts_as_server_side() {
        assert!(Error::timeout("gave up", ErrorContext::new()).is_server_error());
        assert!(Error::Server(ApiFailure::new("oops").with_status(503)).is_server_error());
        assert!(!Error::config("missing key").is_server_error());
    }
}
