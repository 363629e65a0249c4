//! JobOrchestrator - ジョブのライフサイクル
//!
//! 投入（all-or-nothing）、キャンセル、状態の集約、削除。
//! ジョブ状態はタスク状態から導出し、終端状態は二度と変わらない。

use std::sync::Arc;

use tracing::{debug, info};

use crate::app::resolver::DependencyResolver;
use crate::domain::{
    DeletionReport, JobId, JobRecord, JobSpec, JobState, JobStatus, Result, SpiderError,
    TaskCounts, TaskId, TaskOutput, TaskState, TaskTransition,
};
use crate::ports::{Clock, IdGenerator, TaskStore};

pub struct JobOrchestrator {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    resolver: DependencyResolver,
}

impl JobOrchestrator {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            resolver: DependencyResolver::new(Arc::clone(&store)),
            store,
            clock,
            ids,
        }
    }

    /// Validate and insert a job, then make its root tasks ready.
    ///
    /// Nothing is written when validation fails.
    pub async fn submit(&self, spec: JobSpec) -> Result<JobId> {
        let plan = spec.into_plan(self.ids.job_id(), self.clock.now())?;
        let job_id = plan.job.id;
        self.store.insert_job(plan).await?;
        let ready = self.resolver.promote_ready(Some(job_id)).await?;
        info!(job_id = %job_id, ready = ready.len(), "job submitted");
        Ok(job_id)
    }

    /// Cancel a job and every non-terminal task in it.
    ///
    /// Idempotent: cancelling a finished job returns its state unchanged.
    /// Running tasks learn about it on their next renew.
    pub async fn cancel(&self, job: JobId) -> Result<JobState> {
        let record = self.job(job).await?;
        if record.state.is_terminal() {
            return Ok(record.state);
        }
        let cancelled = self.store.cancel_job_tasks(job).await?;
        if self
            .store
            .update_job_state(job, JobState::Running, JobState::Cancel)
            .await?
        {
            info!(job_id = %job, tasks = cancelled.len(), "job cancelled");
            return Ok(JobState::Cancel);
        }
        // Lost the race against another terminal transition.
        Ok(self.job(job).await?.state)
    }

    pub async fn status(&self, job: JobId) -> Result<JobStatus> {
        let record = self.job(job).await?;
        let tasks = TaskCounts::from_states(self.store.job_tasks(job).await?.iter().map(|t| t.state));
        Ok(JobStatus {
            job_id: job,
            state: record.state,
            creation_time: record.creation_time,
            total: tasks.total(),
            tasks,
        })
    }

    /// Follow-up after a lease release or reclaim: cascade or promote, then
    /// refresh the job state.
    pub async fn on_task_released(&self, transition: &TaskTransition) -> Result<JobState> {
        self.resolver.on_transition(transition).await?;
        self.refresh_job_state(transition.job_id).await
    }

    /// Recompute the job state from its tasks and persist a terminal result.
    pub async fn refresh_job_state(&self, job: JobId) -> Result<JobState> {
        let record = self.job(job).await?;
        if record.state.is_terminal() {
            return Ok(record.state);
        }
        let tasks = self.store.job_tasks(job).await?;
        let derived = JobState::derive_from_tasks(tasks.iter().map(|t| t.state));
        if derived == JobState::Running {
            return Ok(derived);
        }
        if self
            .store
            .update_job_state(job, JobState::Running, derived)
            .await?
        {
            info!(job_id = %job, state = %derived, "job finished");
            return Ok(derived);
        }
        Ok(self.job(job).await?.state)
    }

    /// Sweep every running job: repeat cascades, promotions and state
    /// refreshes. All steps are idempotent, so this repairs whatever a crashed
    /// scheduler left half done. Jobs deleted mid-sweep are skipped. Returns
    /// the jobs that finished.
    pub async fn reconcile(&self) -> Result<Vec<JobId>> {
        let mut finished = Vec::new();
        for job in self.store.jobs_in_state(JobState::Running).await? {
            match self.reconcile_job(job).await {
                Ok(true) => finished.push(job),
                Ok(false) => {}
                Err(err) if err.is_not_found() => {
                    debug!(job_id = %job, "job deleted during reconcile");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(finished)
    }

    async fn reconcile_job(&self, job: JobId) -> Result<bool> {
        for task in self.store.job_tasks(job).await? {
            if matches!(task.state, TaskState::Fail | TaskState::Cancel) {
                self.resolver.cascade(task.id).await?;
            }
        }
        self.resolver.promote_ready(Some(job)).await?;
        Ok(self.refresh_job_state(job).await?.is_terminal())
    }

    /// Outputs of the job's output tasks, in declared order. Only available
    /// once the job succeeded.
    pub async fn job_outputs(&self, job: JobId) -> Result<Vec<(TaskId, Vec<TaskOutput>)>> {
        let record = self.job(job).await?;
        if record.state != JobState::Success {
            return Err(SpiderError::Validation(format!(
                "{job} is {}, outputs are only available on success",
                record.state
            )));
        }
        let mut outputs = Vec::with_capacity(record.output_tasks.len());
        for task_id in record.output_tasks {
            let task = self
                .store
                .task(task_id)
                .await?
                .ok_or_else(|| SpiderError::not_found("task", task_id))?;
            outputs.push((task_id, task.outputs));
        }
        Ok(outputs)
    }

    pub async fn delete_job(&self, job: JobId) -> Result<DeletionReport> {
        self.store.delete_job(job).await
    }

    async fn job(&self, job: JobId) -> Result<JobRecord> {
        self.store
            .job(job)
            .await?
            .ok_or_else(|| SpiderError::not_found("job", job))
    }
}
