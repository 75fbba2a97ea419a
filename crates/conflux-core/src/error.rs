use thiserror::Error;

/// Failure reported by a single [`Worker`](crate::worker::Worker) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WorkerError {
    message: String,
}

impl WorkerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors surfaced by a dispatcher call.
///
/// - `InvalidArgument` is returned synchronously, before any worker runs.
/// - `WorkerFailure` / `TaskPanicked` resolve the aggregate handle as failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("task {index} ({worker}) failed: {source}")]
    WorkerFailure {
        index: usize,
        worker: String,
        #[source]
        source: WorkerError,
    },

    #[error("task {index} ({worker}) did not complete: {message}")]
    TaskPanicked {
        index: usize,
        worker: String,
        message: String,
    },
}

impl DispatchError {
    /// Index of the task that caused the failure, if any.
    pub fn task_index(&self) -> Option<usize> {
        match self {
            Self::InvalidArgument(_) => None,
            Self::WorkerFailure { index, .. } | Self::TaskPanicked { index, .. } => Some(*index),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
