//! Mapping from HTTP failures to the shared backend error taxonomy.
//!
//! Every adapter funnels its non-2xx responses through [`status_error`], so
//! the retry policy sees the same classification regardless of provider.

use taskloom_core::BackendError;

/// Markers providers use in error payloads to signal rate limiting even
/// when the status code is not 429.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate_limit",
    "rate limit",
    "ratelimit",
    "resource_exhausted",
    "too many requests",
];

/// Classify a non-success HTTP response.
pub fn status_error(provider: &str, status: u16, body: &str) -> BackendError {
    match status {
        401 | 403 => BackendError::Auth(format!("{provider} rejected the credential (status: {status})")),
        429 => BackendError::Provider {
            status_code: Some(status),
            message: error_message(body),
            retryable: true,
        },
        _ => BackendError::Provider {
            status_code: Some(status),
            message: error_message(body),
            retryable: is_rate_limit_payload(body),
        },
    }
}

/// Classify a transport-level failure from reqwest.
///
/// The request URL is dropped from the message since it may carry credentials.
pub fn transport_error(provider: &str, err: reqwest::Error) -> BackendError {
    BackendError::Transport(format!("{provider}: {}", err.without_url()))
}

/// A 2xx response whose body could not be understood.
pub fn malformed_body(provider: &str, detail: impl std::fmt::Display) -> BackendError {
    BackendError::Provider {
        status_code: None,
        message: format!("{provider} returned an unreadable response: {detail}"),
        retryable: false,
    }
}

fn is_rate_limit_payload(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Pull `error.message` out of a JSON error payload, falling back to the raw
/// body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(String::from))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Shared HTTP client for an adapter.
pub fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
