//! DependencyResolver - 依存関係の解決
//!
//! `pending -> ready` の昇格と、失敗・キャンセルの下流への伝播。
//! どちらも TaskStore 上の冪等な条件付き更新なので、何度呼んでも安全。

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{JobId, Result, TaskId, TaskState, TaskTransition};
use crate::ports::TaskStore;

pub struct DependencyResolver {
    store: Arc<dyn TaskStore>,
}

impl DependencyResolver {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Promote every pending task whose parents all succeeded.
    /// `None` scans every job.
    pub async fn promote_ready(&self, job: Option<JobId>) -> Result<Vec<TaskId>> {
        let promoted = self.store.promote_ready(job).await?;
        if !promoted.is_empty() {
            debug!(count = promoted.len(), "tasks promoted to ready");
        }
        Ok(promoted)
    }

    /// Cancel every transitive dependent of a task that ended in `fail` or
    /// `cancel`.
    pub async fn cascade(&self, task: TaskId) -> Result<Vec<TaskTransition>> {
        let cancelled = self.store.cancel_descendants(task).await?;
        if !cancelled.is_empty() {
            info!(task_id = %task, cancelled = cancelled.len(), "cascaded cancellation");
        }
        Ok(cancelled)
    }

    /// React to one applied transition: cascade on failure, promote on success.
    pub async fn on_transition(&self, transition: &TaskTransition) -> Result<()> {
        if transition.needs_cascade() {
            self.cascade(transition.task_id).await?;
        } else if transition.to == TaskState::Success {
            self.promote_ready(Some(transition.job_id)).await?;
        }
        Ok(())
    }
}
