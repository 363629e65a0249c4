//! Job record and status views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DriverId, JobId, TaskId};
use super::state::{JobState, TaskState};

/// Job row.
///
/// `input_tasks` / `output_tasks` are the ordered entry and exit tasks of the
/// job graph, as declared by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub client_id: DriverId,
    pub creation_time: DateTime<Utc>,
    pub state: JobState,
    pub input_tasks: Vec<TaskId>,
    pub output_tasks: Vec<TaskId>,
}

/// Job status for API responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub success: usize,
    pub fail: usize,
    pub cancel: usize,
}

impl TaskCounts {
    pub fn from_states(states: impl IntoIterator<Item = TaskState>) -> Self {
        let mut counts = TaskCounts::default();
        for state in states {
            match state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Ready => counts.ready += 1,
                TaskState::Running => counts.running += 1,
                TaskState::Success => counts.success += 1,
                TaskState::Fail => counts.fail += 1,
                TaskState::Cancel => counts.cancel += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.ready + self.running + self.success + self.fail + self.cancel
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub state: JobState,
    pub creation_time: DateTime<Utc>,
    pub total: usize,
    pub tasks: TaskCounts,
}

/// What an ownership-aware job deletion removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionReport {
    pub jobs: usize,
    pub tasks: usize,
    pub dependencies: usize,
    pub instances: usize,
    pub leases: usize,
    pub task_kv: usize,
    pub data_refs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_cover_every_state() {
        let counts = TaskCounts::from_states(TaskState::ALL);
        assert_eq!(counts.total(), 6);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.cancel, 1);
    }
}
