//! What the lease holder reports back when an attempt ends.

use serde::{Deserialize, Serialize};

use super::decision::FailureCause;
use super::errors::SpiderError;
use super::ids::{InstanceId, SchedulerId, TaskId};
use super::io::OutputValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskReport {
    /// Output values in slot order.
    Success { outputs: Vec<OutputValue> },
    Failure { message: String },
    TimedOut { seconds: f64 },
}

impl TaskReport {
    pub fn success(outputs: Vec<OutputValue>) -> Self {
        TaskReport::Success { outputs }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        TaskReport::Failure {
            message: message.into(),
        }
    }

    /// The failure cause for non-success reports.
    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            TaskReport::Success { .. } => None,
            TaskReport::Failure { message } => Some(FailureCause::Reported(message.clone())),
            TaskReport::TimedOut { seconds } => Some(FailureCause::TimedOut { seconds: *seconds }),
        }
    }

    /// The error a non-success report amounts to.
    pub fn error(&self, task_id: TaskId) -> Option<SpiderError> {
        match self {
            TaskReport::Success { .. } => None,
            TaskReport::Failure { message } => Some(SpiderError::TaskFailure {
                task_id,
                message: message.clone(),
            }),
            TaskReport::TimedOut { seconds } => Some(SpiderError::Timeout {
                task_id,
                seconds: *seconds,
            }),
        }
    }
}

/// A release request: "`scheduler_id` finished attempt `instance_id` of `task_id`".
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub task_id: TaskId,
    pub scheduler_id: SchedulerId,
    pub instance_id: InstanceId,
    pub report: TaskReport,
}
