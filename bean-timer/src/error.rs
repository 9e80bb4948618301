use thiserror::Error;

/// Result type for timer operations
pub type TimerResult<T> = Result<T, TimerError>;

/// Errors returned when creating timers or wiring timer services.
///
/// Failures inside a timeout callback are never surfaced here; the service
/// logs them and retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("Invalid schedule field '{field}': {reason}")]
    InvalidSchedule { field: String, reason: String },

    #[error("Interval timers need a non-zero interval")]
    InvalidInterval,

    #[error("Invalid timed object descriptor for '{bean_type}': {reason}")]
    InvalidDescriptor { bean_type: String, reason: String },

    #[error("Timer service not found: {0}")]
    ServiceNotFound(String),

    #[error("Executor failed to stop: {0}")]
    ExecutorStop(String),
}

impl TimerError {
    pub(crate) fn schedule(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
