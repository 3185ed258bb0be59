//! Error taxonomy for the Pirex recommendation core.
//!
//! Every variant maps to exactly one of the six design-level categories the
//! recommendation core uses: Validation, NotFound, Transient, Capacity,
//! Degraded, Fatal. Callers match on these categories to decide whether to
//! retry, surface, or recover locally.

use thiserror::Error;

/// The stable, machine-readable error taxonomy for the recommendation core.
#[derive(Error, Debug, Clone)]
pub enum PirexError {
    /// Malformed request, missing required field, or value out of range.
    /// Non-retryable; always surfaced to the caller.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown user/item/job. Recoverable where sensible (new user -> empty
    /// profile, unknown item in an exclusion set -> ignore); otherwise
    /// surfaced.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network timeout, pool exhaustion, or upstream 5xx. Retryable with
    /// exponential backoff, bounded by a deadline and a max attempt count.
    #[error("transient error: {0}")]
    Transient(String),

    /// Queue full, rate limit exceeded, or quota exhausted. Retryable after
    /// a delay; surfaced as a 429-equivalent by the transport layer.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Partial generator failure recovered locally: a result is still
    /// returned, with fewer contributing algorithms and reduced confidence.
    #[error("degraded result: {0}")]
    Degraded(String),

    /// Invariant violation (e.g. embedding dimension mismatch). Never
    /// retried; logged and surfaced as a bug.
    #[error("fatal invariant violation: {0}")]
    Fatal(String),
}

impl PirexError {
    /// Stable machine-readable code, independent of the human-readable message.
    pub fn code(&self) -> &'static str {
        match self {
            PirexError::Validation(_) => "validation",
            PirexError::NotFound(_) => "not_found",
            PirexError::Transient(_) => "transient",
            PirexError::Capacity(_) => "capacity",
            PirexError::Degraded(_) => "degraded",
            PirexError::Fatal(_) => "fatal",
        }
    }

    /// Whether a caller should retry this error after a backoff delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PirexError::Transient(_) | PirexError::Capacity(_))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        PirexError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        PirexError::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        PirexError::Transient(msg.into())
    }

    pub fn capacity(msg: impl Into<String>) -> Self {
        PirexError::Capacity(msg.into())
    }

    pub fn degraded(msg: impl Into<String>) -> Self {
        PirexError::Degraded(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        PirexError::Fatal(msg.into())
    }
}

impl From<serde_json::Error> for PirexError {
    fn from(error: serde_json::Error) -> Self {
        PirexError::Validation(format!("serialization error: {}", error))
    }
}

impl From<anyhow::Error> for PirexError {
    fn from(error: anyhow::Error) -> Self {
        PirexError::Fatal(format!("unexpected error: {}", error))
    }
}

/// A failure surfaced to a caller, carrying the stable pieces an external
/// transport layer needs regardless of which boundary raised it: the error
/// itself, when it happened, and a correlator for tracing it across logs.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub error: PirexError,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub correlation_id: String,
}

impl RequestOutcome {
    pub fn new(error: PirexError, correlation_id: impl Into<String>) -> Self {
        Self {
            error,
            timestamp: chrono::Utc::now(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// Result type used throughout the Pirex recommendation core.
pub type Result<T> = std::result::Result<T, PirexError>;
