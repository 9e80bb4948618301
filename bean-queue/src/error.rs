use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced to callers of the queue engine.
///
/// Everything that goes wrong inside a worker loop is logged there instead.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid priority key: {0}")]
    InvalidPriority(String),

    #[error("Codec not found: {0}")]
    CodecNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Worker for queue '{queue}' ({priority}) failed to stop: {reason}")]
    WorkerStop {
        queue: String,
        priority: String,
        reason: String,
    },

    #[error("Shutdown incomplete: {failed} worker(s) failed to stop")]
    ShutdownIncomplete { failed: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
