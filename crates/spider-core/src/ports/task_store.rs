//! TaskStore port - the single source of truth.
//!
//! The store owns every job, task, edge, instance, lease and blob. Scheduler
//! processes hold nothing but transient views and coordinate exclusively
//! through the conditional updates below.
//!
//! # Contract
//! - Every method is atomic with respect to every other method.
//! - State changes are conditional on the current row ("set ready where
//!   state = pending and no parent is unfinished"), so concurrent callers can
//!   race freely and at most one of them wins.
//! - `try_acquire` guarantees at most one unexpired lease per task.
//! - `complete` and `renew_lease` fence on the `(scheduler, task)` lease row
//!   and the task's current instance.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    AcquireOutcome, Completion, DataId, DataRecord, Decider, DeletionReport, DriverId, DriverRecord,
    InstanceId, JobId, JobPlan, JobRecord, JobState, Lease, RenewStatus, ResolvedInput, Result,
    SchedulerId, SchedulerRecord, SpiderError, TaskId, TaskInstance, TaskRecord, TaskTransition,
};

/// Width of the `kv_key` columns.
pub const MAX_KV_KEY_LEN: usize = 64;

/// A lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireRequest {
    pub task_id: TaskId,
    pub scheduler_id: SchedulerId,
    /// Id of the instance to create if the lease is granted.
    pub instance_id: InstanceId,
    pub now: DateTime<Utc>,
    pub ttl: Duration,
}

/// Filter for polling ready tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyQuery {
    pub limit: usize,
    /// Only return tasks whose hard-locality inputs are reachable from here.
    pub address: Option<String>,
}

impl ReadyQuery {
    pub fn any(limit: usize) -> Self {
        Self {
            limit,
            address: None,
        }
    }
}

pub fn validate_kv_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KV_KEY_LEN {
        return Err(SpiderError::Validation(format!(
            "kv key must be 1..={MAX_KV_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(())
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    // ---- drivers / schedulers ----

    async fn register_driver(&self, id: DriverId, now: DateTime<Utc>) -> Result<()>;

    async fn heartbeat_driver(&self, id: DriverId, now: DateTime<Utc>) -> Result<()>;

    async fn driver(&self, id: DriverId) -> Result<Option<DriverRecord>>;

    async fn register_scheduler(&self, scheduler: SchedulerRecord) -> Result<()>;

    async fn heartbeat_scheduler(&self, id: SchedulerId, now: DateTime<Utc>) -> Result<()>;

    async fn scheduler(&self, id: SchedulerId) -> Result<Option<SchedulerRecord>>;

    async fn stale_schedulers(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<SchedulerRecord>>;

    // ---- jobs ----

    /// Insert a validated job with all its tasks and edges, or nothing.
    async fn insert_job(&self, plan: JobPlan) -> Result<()>;

    async fn job(&self, id: JobId) -> Result<Option<JobRecord>>;

    async fn jobs_in_state(&self, state: JobState) -> Result<Vec<JobId>>;

    /// Compare-and-set on the job state. Returns whether it applied.
    async fn update_job_state(&self, id: JobId, from: JobState, to: JobState) -> Result<bool>;

    /// Remove the job and everything it owns except data blobs.
    async fn delete_job(&self, id: JobId) -> Result<DeletionReport>;

    // ---- tasks ----

    async fn task(&self, id: TaskId) -> Result<Option<TaskRecord>>;

    async fn job_tasks(&self, job: JobId) -> Result<Vec<TaskRecord>>;

    /// `(parent, child)` edges among the job's tasks.
    async fn job_dependencies(&self, job: JobId) -> Result<Vec<(TaskId, TaskId)>>;

    async fn task_instances(&self, task: TaskId) -> Result<Vec<TaskInstance>>;

    /// `pending -> ready` for every task (of `job`, or of every job) whose
    /// parents all succeeded. Idempotent; returns the promoted tasks.
    async fn promote_ready(&self, job: Option<JobId>) -> Result<Vec<TaskId>>;

    async fn ready_tasks(&self, query: ReadyQuery) -> Result<Vec<TaskRecord>>;

    /// Cancel every non-terminal transitive dependent of `task`.
    async fn cancel_descendants(&self, task: TaskId) -> Result<Vec<TaskTransition>>;

    /// Cancel every non-terminal task of `job`.
    async fn cancel_job_tasks(&self, job: JobId) -> Result<Vec<TaskTransition>>;

    /// Materialise the input slots of `task` for dispatch.
    async fn resolve_inputs(&self, task: TaskId) -> Result<Vec<ResolvedInput>>;

    // ---- leases ----

    async fn try_acquire(&self, request: AcquireRequest) -> Result<AcquireOutcome>;

    /// Bump `lease_time` to `now`. `LeaseLost` if the row is gone.
    async fn renew_lease(
        &self,
        task: TaskId,
        scheduler: SchedulerId,
        now: DateTime<Utc>,
    ) -> Result<RenewStatus>;

    /// Delete the lease and apply the report to the task.
    async fn complete(
        &self,
        completion: Completion,
        decider: &dyn Decider,
    ) -> Result<TaskTransition>;

    async fn lease(&self, task: TaskId) -> Result<Option<Lease>>;

    async fn expired_leases(&self, now: DateTime<Utc>, ttl: Duration) -> Result<Vec<Lease>>;

    /// Delete the lease of `task` if it expired, and requeue (or fail) the task.
    /// `None` when there was nothing to reclaim.
    async fn reclaim(
        &self,
        task: TaskId,
        now: DateTime<Utc>,
        ttl: Duration,
        decider: &dyn Decider,
    ) -> Result<Option<TaskTransition>>;

    // ---- data ----

    /// Store a blob. Content addressed, so repeated puts are no-ops.
    async fn put_data(&self, data: DataRecord) -> Result<DataId>;

    async fn data(&self, id: DataId) -> Result<Option<DataRecord>>;

    async fn add_data_locality(&self, id: DataId, address: String) -> Result<()>;

    async fn add_data_driver_ref(&self, id: DataId, driver: DriverId) -> Result<()>;

    async fn remove_data_driver_ref(&self, id: DataId, driver: DriverId) -> Result<()>;

    async fn add_data_task_ref(&self, id: DataId, task: TaskId) -> Result<()>;

    async fn remove_data_task_ref(&self, id: DataId, task: TaskId) -> Result<()>;

    async fn mark_data_persisted(&self, id: DataId) -> Result<()>;

    /// Delete unreferenced, non-persisted blobs.
    async fn collect_garbage(&self) -> Result<Vec<DataId>>;

    // ---- key/value ----

    async fn put_client_kv(&self, client: DriverId, key: &str, value: Vec<u8>) -> Result<()>;

    async fn client_kv(&self, client: DriverId, key: &str) -> Result<Option<Vec<u8>>>;

    async fn put_task_kv(&self, task: TaskId, key: &str, value: Vec<u8>) -> Result<()>;

    async fn task_kv(&self, task: TaskId, key: &str) -> Result<Option<Vec<u8>>>;
}
