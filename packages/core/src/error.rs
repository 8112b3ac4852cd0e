//! Error types shared by task bodies and graph builders.

use thiserror::Error;

/// Failure of a single task.
///
/// The display string is persisted verbatim as the task's failure reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Desired state is invalid; raised before any external call.
    #[error("{0}")]
    Validation(String),
    /// Desired and actual state disagree in a way the task will not resolve.
    #[error("{0}")]
    Consistency(String),
    /// The external controller reported an error.
    #[error("{0}")]
    Controller(String),
    /// Reading or writing persisted state failed.
    #[error("{0}")]
    Store(String),
    #[error("Task timed out after {0}s")]
    Timeout(u64),
    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn validation(message: impl Into<String>) -> Self {
        TaskError::Validation(message.into())
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        TaskError::Consistency(message.into())
    }
}

/// Errors raised while building a task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Node {0} does not belong to this graph")]
    UnknownNode(usize),
}
