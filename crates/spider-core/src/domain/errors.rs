//! Errors and their operational classification.

use thiserror::Error;

use super::ids::{SchedulerId, TaskId};
use super::state::TaskState;

/// Operational class of an error. Decides whether the coordinator backs off
/// and retries or surfaces the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Races and task-level failures; retrying is expected to help.
    Transient,
    /// Malformed input or broken invariants; retrying cannot help.
    Permanent,
    /// The store or another collaborator is unavailable.
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum SpiderError {
    /// The submitted graph is not a valid DAG (or references unknown nodes).
    #[error("structural error: {0}")]
    Structural(String),

    /// Lease acquisition lost a race. Not a failure.
    #[error("lease on {task_id} denied: {reason}")]
    LeaseDenied { task_id: TaskId, reason: String },

    /// The caller no longer owns the lease; any uncommitted result must be discarded.
    #[error("lease on {task_id} lost by {scheduler_id}")]
    LeaseLost {
        task_id: TaskId,
        scheduler_id: SchedulerId,
    },

    #[error("task {task_id} failed: {message}")]
    TaskFailure { task_id: TaskId, message: String },

    #[error("task {task_id} timed out after {seconds}s")]
    Timeout { task_id: TaskId, seconds: f64 },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),
}

impl SpiderError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        SpiderError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SpiderError::LeaseDenied { .. }
            | SpiderError::LeaseLost { .. }
            | SpiderError::TaskFailure { .. }
            | SpiderError::Timeout { .. } => ErrorKind::Transient,
            SpiderError::Io(_) | SpiderError::Store(_) => ErrorKind::Infrastructure,
            SpiderError::Structural(_)
            | SpiderError::Validation(_)
            | SpiderError::InvalidTransition { .. }
            | SpiderError::NotFound { .. }
            | SpiderError::Config(_)
            | SpiderError::Toml(_) => ErrorKind::Permanent,
        }
    }

    /// The row is gone, usually because its job was deleted concurrently.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SpiderError::NotFound { .. })
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Permanent)
    }
}

pub type Result<T> = std::result::Result<T, SpiderError>;
