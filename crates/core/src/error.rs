//! Error types for the Taskloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! carries the ones that may terminate a run.

use thiserror::Error;

/// The top-level error type for engine operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Identity errors ---
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    // --- Planner errors ---
    #[error("Malformed plan response: {0}")]
    MalformedPlan(String),

    #[error("Delegation depth {depth} exceeds the limit of {max}")]
    DelegationDepth { depth: u32, max: u32 },

    // --- Control flow ---
    #[error("Run cancelled")]
    Cancelled,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is about configuration or identity rather than
    /// one task's progress. Fatal errors abort the whole run.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Backend(BackendError::Auth(_)) => true,
            Error::Backend(_) => false,
            Error::UnknownBackend(_)
            | Error::UnknownRole(_)
            | Error::MalformedPlan(_)
            | Error::Cancelled
            | Error::Config { .. } => true,
            Error::DelegationDepth { .. } | Error::Serialization(_) => false,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// The shared taxonomy every backend adapter classifies its failures into.
///
/// The retry policy only ever looks at this enum, never at provider-specific
/// payloads.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The endpoint could not be reached.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Missing or rejected credential. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A structured error payload returned by the provider.
    #[error("Provider error: {message}{}", status_suffix(.status_code))]
    Provider {
        status_code: Option<u16>,
        message: String,
        retryable: bool,
    },
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code.map(|c| format!(" (status: {c})")).unwrap_or_default()
}

impl BackendError {
    /// A rate-limit error, the only kind the retry policy reacts to.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        BackendError::Provider {
            status_code: Some(429),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Provider { retryable: true, .. })
    }
}

/// Failures inside one action handler.
///
/// These never leave the executor: they are converted into a failed
/// `ActionResult` so the agent can reason about them.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Invalid action parameters: {0}")]
    InvalidParams(String),

    #[error("{action} failed: {reason}")]
    Io { action: String, reason: String },

    #[error("{action} timed out after {timeout_secs}s")]
    Timeout { action: String, timeout_secs: u64 },
}
