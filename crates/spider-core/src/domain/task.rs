//! Task row, task instances, and the single-task state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::decision::Decision;
use super::errors::{Result, SpiderError};
use super::ids::{InstanceId, JobId, TaskId};
use super::io::{TaskInput, TaskOutput};
use super::state::{Language, TaskState};

/// The authoritative row of a task.
///
/// All state changes go through the methods below so the lifecycle in
/// [`TaskState::can_transition_to`] is enforced in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub job_id: JobId,
    pub func_name: String,
    pub language: Language,
    pub state: TaskState,
    /// Per-attempt bound in seconds, enforced by the lease holder.
    pub timeout: Option<f32>,
    pub max_retry: u32,
    pub retry: u32,
    /// Current attempt. Set only while `state == Running`.
    pub instance_id: Option<InstanceId>,
    pub inputs: Vec<TaskInput>,
    pub outputs: Vec<TaskOutput>,
}

/// One attempt of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: InstanceId,
    pub task_id: TaskId,
    pub start_time: DateTime<Utc>,
}

/// A state change that was applied to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTransition {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub from: TaskState,
    pub to: TaskState,
    pub retry: u32,
}

impl TaskTransition {
    /// The task ended in `fail` or `cancel`, so its dependents must be cancelled.
    pub fn needs_cascade(&self) -> bool {
        matches!(self.to, TaskState::Fail | TaskState::Cancel) && self.from != self.to
    }
}

impl TaskRecord {
    pub fn new(id: TaskId, job_id: JobId, func_name: impl Into<String>, language: Language) -> Self {
        Self {
            id,
            job_id,
            func_name: func_name.into(),
            language,
            state: TaskState::Pending,
            timeout: None,
            max_retry: 0,
            retry: 0,
            instance_id: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    fn transition(&mut self, to: TaskState) -> Result<TaskTransition> {
        if !self.state.can_transition_to(to) {
            return Err(SpiderError::InvalidTransition {
                task_id: self.id,
                from: self.state,
                to,
            });
        }
        let from = self.state;
        self.state = to;
        if to != TaskState::Running {
            self.instance_id = None;
        }
        Ok(TaskTransition {
            task_id: self.id,
            job_id: self.job_id,
            from,
            to,
            retry: self.retry,
        })
    }

    /// `pending -> ready`, once every parent succeeded.
    pub fn promote(&mut self) -> Result<TaskTransition> {
        self.transition(TaskState::Ready)
    }

    /// `ready -> running` for a freshly granted lease.
    pub fn start(&mut self, instance_id: InstanceId) -> Result<TaskTransition> {
        let transition = self.transition(TaskState::Running)?;
        self.instance_id = Some(instance_id);
        Ok(transition)
    }

    pub fn succeed(&mut self) -> Result<TaskTransition> {
        self.transition(TaskState::Success)
    }

    /// Apply a [`Decision`] to a running task.
    pub fn apply(&mut self, decision: &Decision) -> Result<TaskTransition> {
        match decision {
            Decision::Retry { retry, .. } => {
                if *retry > self.max_retry {
                    return Err(SpiderError::Validation(format!(
                        "retry {retry} exceeds max_retry {} for {}",
                        self.max_retry, self.id
                    )));
                }
                let mut transition = self.transition(TaskState::Ready)?;
                self.retry = *retry;
                transition.retry = *retry;
                Ok(transition)
            }
            Decision::Requeue { .. } => self.transition(TaskState::Ready),
            Decision::MarkFailed { .. } => self.transition(TaskState::Fail),
        }
    }

    /// Cancel a non-terminal task. Terminal tasks are left untouched and
    /// `None` is returned, which makes cascades idempotent.
    pub fn cancel(&mut self) -> Option<TaskTransition> {
        if self.state.is_terminal() {
            return None;
        }
        self.transition(TaskState::Cancel).ok()
    }
}
