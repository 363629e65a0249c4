//! TaskExecutor port - runs one attempt of a task.

use async_trait::async_trait;

use crate::domain::{InstanceId, JobId, Language, OutputValue, ResolvedInput, TaskId};

/// Everything a worker needs to run one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub instance_id: InstanceId,
    pub func_name: String,
    pub language: Language,
    /// Inputs in slot order.
    pub inputs: Vec<ResolvedInput>,
}

/// Runs user functions.
///
/// Returns the output values in slot order, or the worker's error message.
/// Timeouts are enforced by the caller, not by the executor.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, assignment: Assignment) -> Result<Vec<OutputValue>, String>;
}
