//! Retry policy and response-classification helpers shared by the engine.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;

use crate::errors::{ApiFailure, Error, ErrorContext};

/// Status codes retried by default: timeouts, rate limits, and transient 5xx.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Retry/backoff policy applied by the engine to every request.
///
/// All calls routed through the engine are assumed idempotent: POSTs with
/// side effects (key creation, video queue) are retried on retryable statuses
/// and transport errors under this same policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries on top of the initial attempt.
    pub max_retries: u32,
    /// Base delay in milliseconds; attempt `k` waits `base * 2^(k-1)` +/- 20% jitter.
    pub backoff_ms: u64,
    /// Statuses that trigger a retry. Transport errors always do.
    pub retry_status_codes: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 500,
            retry_status_codes: DEFAULT_RETRY_STATUS_CODES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        self.retry_status_codes.contains(&status.as_u16())
    }

    /// Exponential delay after the `attempt`-th failure (1-indexed), before jitter.
    fn base_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << shift))
    }

    /// Delay to sleep before the next attempt. A `Retry-After` hint from a 429
    /// response sets the floor.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.base_delay(attempt);
        let jittered = base.mul_f64(rand::thread_rng().gen_range(0.8..=1.2));
        match retry_after {
            Some(hint) if hint > jittered => hint,
            _ => jittered,
        }
    }
}

/// `Retry-After` in delta-seconds. HTTP-date forms are treated as absent.
pub(crate) fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

pub(crate) fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn rate_limit_remaining(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Map a non-success response to the error kind for its status and body.
///
/// The body is inspected for an `{"error": {"code", "message", ...}}` object;
/// a bare `{"error": "..."}` string is normalized to the same shape.
pub(crate) fn classify_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
    method: &str,
    path: &str,
) -> Error {
    let status_code = status.as_u16();
    let text = String::from_utf8_lossy(body);

    let mut code: Option<String> = None;
    let mut message = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
        match value.get("error") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => message = s.clone(),
            Some(serde_json::Value::Object(err)) => {
                code = err
                    .get("code")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                if let Some(m) = err.get("message").and_then(|v| v.as_str()) {
                    message = m.to_string();
                }
            }
            _ => {
                if let Some(m) = value.get("message").and_then(|v| v.as_str()) {
                    message = m.to_string();
                }
            }
        }
    } else if !text.trim().is_empty() {
        message = text.trim().to_string();
    }

    let mut context = ErrorContext::new()
        .with("method", method)
        .with("path", path);
    if let Some(request_id) = request_id_from_headers(headers) {
        context.insert("request_id", request_id);
    }
    if let Some(retry_after) = retry_after_seconds(headers) {
        context.insert("retry_after", retry_after.to_string());
    }

    let mut failure = ApiFailure::new(message)
        .with_status(status_code)
        .with_context(context);
    if let Some(code_str) = &code {
        failure = failure.with_code(code_str.clone());
    }

    match status_code {
        401 => Error::Unauthorized(failure),
        429 => Error::RateLimited(failure),
        404 => match code.as_deref() {
            Some("MODEL_NOT_FOUND") => Error::ModelNotFound(failure),
            Some("CHARACTER_NOT_FOUND") => Error::CharacterNotFound(failure),
            _ => Error::InvalidRequest(failure),
        },
        400..=499 => Error::InvalidRequest(failure),
        _ => Error::Server(failure),
    }
}
