//! Task and job lifecycle states.
//!
//! State transitions for a task:
//! - Pending -> Ready            (all dependency parents succeeded)
//! - Ready -> Running            (lease acquired, instance created)
//! - Running -> Success          (worker reported success)
//! - Running -> Ready            (failure with budget left, timeout with budget left, lease reclaimed)
//! - Running -> Fail             (failure with budget exhausted)
//! - Pending | Ready | Running -> Cancel (job cancelled or an ancestor failed)
//!
//! `Success`, `Fail` and `Cancel` are terminal. A retried task goes straight
//! back to `Ready`, so `Fail` is only ever observed once the budget is spent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::SpiderError;

/// Persisted task state. Serialized with the lowercase names of the
/// `tasks.state` enum column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Success,
    Cancel,
    Fail,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Pending,
        TaskState::Ready,
        TaskState::Running,
        TaskState::Success,
        TaskState::Cancel,
        TaskState::Fail,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Cancel | TaskState::Fail)
    }

    /// Is this task eligible for a lease?
    pub fn is_leasable(self) -> bool {
        matches!(self, TaskState::Ready)
    }

    /// Whether the lifecycle permits `self -> to`.
    pub fn can_transition_to(self, to: TaskState) -> bool {
        use TaskState::*;
        match (self, to) {
            (Pending, Ready) => true,
            (Ready, Running) => true,
            (Running, Success) | (Running, Fail) | (Running, Ready) => true,
            (Pending | Ready | Running, Cancel) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Cancel => "cancel",
            TaskState::Fail => "fail",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = SpiderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| SpiderError::Validation(format!("unknown task state '{s}'")))
    }
}

/// Persisted job state (`jobs.state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Success,
    Fail,
    Cancel,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Success => "success",
            JobState::Fail => "fail",
            JobState::Cancel => "cancel",
        }
    }

    /// Aggregate state implied by the task states of a job.
    ///
    /// Callers are expected to have cascaded cancellation from failed tasks
    /// first; a job with any terminal `Fail` task is failed even while
    /// unrelated branches keep running.
    pub fn derive_from_tasks(states: impl IntoIterator<Item = TaskState>) -> JobState {
        let mut any = false;
        let mut all_success = true;
        let mut all_terminal = true;
        let mut any_fail = false;
        for state in states {
            any = true;
            all_success &= state == TaskState::Success;
            all_terminal &= state.is_terminal();
            any_fail |= state == TaskState::Fail;
        }
        if !any {
            JobState::Running
        } else if all_success {
            JobState::Success
        } else if any_fail {
            JobState::Fail
        } else if all_terminal {
            JobState::Cancel
        } else {
            JobState::Running
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implementation language of a task function (`tasks.language`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Cpp,
    Python,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Cpp => "cpp",
            Language::Python => "python",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = SpiderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpp" => Ok(Language::Cpp),
            "python" => Ok(Language::Python),
            other => Err(SpiderError::Validation(format!("unknown language '{other}'"))),
        }
    }
}
