//! Error types for generation lifecycles and the scheduler.

use crate::types::UnitId;
use thiserror::Error;

/// How the scheduler treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad input; never retried.
    Validation,
    /// Prompt preparation failed; retried only by explicit user action.
    Preparation,
    /// Provider signalled rate limiting; retried after the global backoff window.
    RateLimit,
    /// Transient provider failure; retried after the configured delay.
    Transient,
    /// Video polling ceiling exceeded; never retried.
    Timeout,
    /// Anything else that must not be retried.
    Fatal,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::RateLimit | ErrorClass::Transient)
    }
}

/// Errors raised by providers, lifecycles and the scheduler.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Prompt preparation failed: {0}")]
    Preparation(String),

    #[error("Provider rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Video job {job_id} timed out after {polls} polls")]
    Timeout { job_id: String, polls: u32 },

    #[error("Provider does not support {0}")]
    Unsupported(String),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Generation queue is full ({0} units)")]
    QueueFull(usize),

    #[error("Unit not found: {0}")]
    UnitNotFound(UnitId),

    #[error("Invalid lifecycle transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler stopped: {0}")]
    SchedulerStopped(String),

    #[error("Timed out after {millis}ms waiting for the queue to drain")]
    WaitTimeout { millis: u64 },

    #[error("History error: {0}")]
    History(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl GenerationError {
    pub fn validation(message: impl Into<String>) -> Self {
        GenerationError::Validation(vec![message.into()])
    }

    /// Classify this error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            GenerationError::Validation(_)
            | GenerationError::Unsupported(_)
            | GenerationError::ProviderNotConfigured(_) => ErrorClass::Validation,
            GenerationError::Preparation(_) => ErrorClass::Preparation,
            GenerationError::RateLimit(_) => ErrorClass::RateLimit,
            GenerationError::Provider(message) => {
                if is_rate_limit_message(message) {
                    ErrorClass::RateLimit
                } else {
                    ErrorClass::Transient
                }
            }
            GenerationError::Timeout { .. } => ErrorClass::Timeout,
            GenerationError::Io(_) => ErrorClass::Transient,
            GenerationError::QueueFull(_)
            | GenerationError::UnitNotFound(_)
            | GenerationError::InvalidTransition(_)
            | GenerationError::Config(_)
            | GenerationError::SchedulerStopped(_)
            | GenerationError::WaitTimeout { .. }
            | GenerationError::History(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        self.class() == ErrorClass::RateLimit
    }
}

/// Matches HTTP 429 style messages and the usual rate-limit phrasing.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("rate limit") || lower.contains("too many requests") || has_status_429(&lower)
}

/// `429` as a standalone token, not part of an id like `job-14290`.
fn has_status_429(message: &str) -> bool {
    let bytes = message.as_bytes();
    message.match_indices("429").any(|(start, _)| {
        let end = start + 3;
        let before_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let after_ok = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        let in_id = start > 0 && bytes[start - 1] == b'-';
        before_ok && after_ok && !in_id
    })
}

impl From<config::ConfigError> for GenerationError {
    fn from(err: config::ConfigError) -> Self {
        GenerationError::Config(err.to_string())
    }
}

impl From<std::io::Error> for GenerationError {
    fn from(err: std::io::Error) -> Self {
        GenerationError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GenerationError {
    fn from(err: serde_json::Error) -> Self {
        GenerationError::History(err.to_string())
    }
}
