//! In-memory TaskStore.
//!
//! A single `tokio::sync::Mutex` guards every table, so each trait method is
//! one critical section and conditional updates behave like the row-level
//! compare-and-set a SQL backend would issue.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{
    AcquireOutcome, Completion, DataId, DataRecord, Decider, DeletionReport, DenyReason,
    DependencyGraph, DriverId, DriverRecord, FailureCause, InputSource, JobId, JobPlan, JobRecord,
    JobState, Lease, LeaseGrant, OutputValue, RenewStatus, ResolvedInput, Result, SchedulerId,
    SchedulerRecord, SpiderError, TaskId, TaskInstance, TaskRecord, TaskReport, TaskState,
    TaskTransition,
};
use crate::ports::{AcquireRequest, ReadyQuery, TaskStore, validate_kv_key};

#[derive(Default)]
struct StoreState {
    drivers: HashMap<DriverId, DriverRecord>,
    schedulers: HashMap<SchedulerId, SchedulerRecord>,

    jobs: HashMap<JobId, JobRecord>,
    /// Tasks of each job, in submission order.
    job_tasks: HashMap<JobId, Vec<TaskId>>,
    tasks: HashMap<TaskId, TaskRecord>,
    graph: DependencyGraph,
    instances: HashMap<TaskId, Vec<TaskInstance>>,

    /// Keyed by task: at most one lease row per task.
    leases: HashMap<TaskId, Lease>,

    data: HashMap<DataId, DataRecord>,
    data_driver_refs: HashMap<DataId, HashSet<DriverId>>,
    data_task_refs: HashMap<DataId, HashSet<TaskId>>,

    client_kv: HashMap<(DriverId, String), Vec<u8>>,
    task_kv: HashMap<(TaskId, String), Vec<u8>>,
}

impl StoreState {
    fn task_mut(&mut self, id: TaskId) -> Result<&mut TaskRecord> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| SpiderError::not_found("task", id))
    }

    fn data_exists(&self, id: DataId) -> Result<()> {
        if self.data.contains_key(&id) {
            Ok(())
        } else {
            Err(SpiderError::not_found("data", id))
        }
    }

    fn parents_succeeded(&self, task: TaskId) -> bool {
        self.graph.parents(task).all(|parent| {
            self.tasks
                .get(&parent)
                .is_some_and(|p| p.state == TaskState::Success)
        })
    }

    /// Whether a hard-locality input of `task` is unreachable from `address`.
    fn locality_violation(&self, task: &TaskRecord, address: &str) -> bool {
        task.inputs.iter().any(|input| match input.source {
            InputSource::Data(id) => self
                .data
                .get(&id)
                .is_none_or(|data| !data.reachable_from(address)),
            _ => false,
        })
    }

    fn output_value(&self, value: &OutputValue) -> Result<Vec<u8>> {
        match value {
            OutputValue::Value(bytes) => Ok(bytes.clone()),
            OutputValue::Data(id) => self
                .data
                .get(id)
                .map(|d| d.value.clone())
                .ok_or_else(|| SpiderError::not_found("data", id)),
        }
    }

    /// Validate a success report against the declared output slots.
    fn check_outputs(&self, task: &TaskRecord, outputs: &[OutputValue]) -> Result<()> {
        if outputs.len() != task.outputs.len() {
            return Err(SpiderError::Validation(format!(
                "{} declared {} outputs but reported {}",
                task.id,
                task.outputs.len(),
                outputs.len()
            )));
        }
        for value in outputs {
            if let OutputValue::Data(id) = value {
                self.data_exists(*id)?;
            }
        }
        Ok(())
    }

    fn add_task_ref(&mut self, data: DataId, task: TaskId) {
        self.data_task_refs.entry(data).or_default().insert(task);
    }
}

/// In-memory [`TaskStore`] for tests, the simulator, and single-process use.
#[derive(Default)]
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn register_driver(&self, id: DriverId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.drivers.insert(id, DriverRecord { id, heartbeat: now });
        Ok(())
    }

    async fn heartbeat_driver(&self, id: DriverId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let driver = state
            .drivers
            .get_mut(&id)
            .ok_or_else(|| SpiderError::not_found("driver", id))?;
        driver.heartbeat = now;
        Ok(())
    }

    async fn driver(&self, id: DriverId) -> Result<Option<DriverRecord>> {
        Ok(self.state.lock().await.drivers.get(&id).cloned())
    }

    async fn register_scheduler(&self, scheduler: SchedulerRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        info!(scheduler_id = %scheduler.id, address = %scheduler.address, port = scheduler.port, "scheduler registered");
        state.schedulers.insert(scheduler.id, scheduler);
        Ok(())
    }

    async fn heartbeat_scheduler(&self, id: SchedulerId, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let scheduler = state
            .schedulers
            .get_mut(&id)
            .ok_or_else(|| SpiderError::not_found("scheduler", id))?;
        scheduler.heartbeat = now;
        Ok(())
    }

    async fn scheduler(&self, id: SchedulerId) -> Result<Option<SchedulerRecord>> {
        Ok(self.state.lock().await.schedulers.get(&id).cloned())
    }

    async fn stale_schedulers(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<SchedulerRecord>> {
        let state = self.state.lock().await;
        let mut stale: Vec<SchedulerRecord> = state
            .schedulers
            .values()
            .filter(|s| s.is_stale(now, timeout))
            .cloned()
            .collect();
        stale.sort_by_key(|s| s.id);
        Ok(stale)
    }

    async fn insert_job(&self, plan: JobPlan) -> Result<()> {
        let mut state = self.state.lock().await;
        let job_id = plan.job.id;

        // Check everything first: nothing is written unless the whole job fits.
        if state.jobs.contains_key(&job_id) {
            return Err(SpiderError::Validation(format!("{job_id} already exists")));
        }
        if !state.drivers.contains_key(&plan.job.client_id) {
            return Err(SpiderError::not_found("driver", plan.job.client_id));
        }
        if let Some(task) = plan.tasks.iter().find(|t| state.tasks.contains_key(&t.id)) {
            return Err(SpiderError::Structural(format!("{} already exists", task.id)));
        }
        for id in plan.data_inputs() {
            state.data_exists(id)?;
        }

        let JobPlan {
            job,
            tasks,
            dependencies,
        } = plan;
        for &(parent, child) in &dependencies {
            state.graph.add_dependency(parent, child);
        }
        let mut order = Vec::with_capacity(tasks.len());
        for task in tasks {
            let data: Vec<DataId> = task
                .inputs
                .iter()
                .filter_map(|i| match i.source {
                    InputSource::Data(id) => Some(id),
                    _ => None,
                })
                .collect();
            for id in data {
                state.add_task_ref(id, task.id);
            }
            order.push(task.id);
            state.tasks.insert(task.id, task);
        }

        info!(job_id = %job_id, tasks = order.len(), edges = dependencies.len(), "job inserted");
        state.job_tasks.insert(job_id, order);
        state.jobs.insert(job_id, job);
        Ok(())
    }

    async fn job(&self, id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn jobs_in_state(&self, job_state: JobState) -> Result<Vec<JobId>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<&JobRecord> = state
            .jobs
            .values()
            .filter(|j| j.state == job_state)
            .collect();
        jobs.sort_by_key(|j| (j.creation_time, j.id));
        Ok(jobs.into_iter().map(|j| j.id).collect())
    }

    async fn update_job_state(&self, id: JobId, from: JobState, to: JobState) -> Result<bool> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(&id)
            .ok_or_else(|| SpiderError::not_found("job", id))?;
        if job.state != from {
            return Ok(false);
        }
        job.state = to;
        info!(job_id = %id, from = %from, to = %to, "job state changed");
        Ok(true)
    }

    async fn delete_job(&self, id: JobId) -> Result<DeletionReport> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if !state.jobs.contains_key(&id) {
            return Err(SpiderError::not_found("job", id));
        }

        let tasks = state.job_tasks.remove(&id).unwrap_or_default();
        let mut report = DeletionReport {
            jobs: 1,
            ..DeletionReport::default()
        };
        for &task in &tasks {
            // Edges never cross jobs, so counting parents counts every edge once.
            report.dependencies += state.graph.parents(task).count();
        }
        for &task in &tasks {
            state.graph.remove_task(task);
            if state.tasks.remove(&task).is_some() {
                report.tasks += 1;
            }
            report.instances += state.instances.remove(&task).map_or(0, |v| v.len());
            if state.leases.remove(&task).is_some() {
                report.leases += 1;
            }
            for refs in state.data_task_refs.values_mut() {
                if refs.remove(&task) {
                    report.data_refs += 1;
                }
            }
        }
        let before = state.task_kv.len();
        let owned: HashSet<TaskId> = tasks.iter().copied().collect();
        state.task_kv.retain(|(task, _), _| !owned.contains(task));
        report.task_kv = before - state.task_kv.len();
        state.data_task_refs.retain(|_, refs| !refs.is_empty());
        state.jobs.remove(&id);

        info!(job_id = %id, tasks = report.tasks, leases = report.leases, "job deleted");
        Ok(report)
    }

    async fn task(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        Ok(self.state.lock().await.tasks.get(&id).cloned())
    }

    async fn job_tasks(&self, job: JobId) -> Result<Vec<TaskRecord>> {
        let state = self.state.lock().await;
        let ids = state
            .job_tasks
            .get(&job)
            .ok_or_else(|| SpiderError::not_found("job", job))?;
        Ok(ids
            .iter()
            .filter_map(|id| state.tasks.get(id).cloned())
            .collect())
    }

    async fn job_dependencies(&self, job: JobId) -> Result<Vec<(TaskId, TaskId)>> {
        let state = self.state.lock().await;
        let ids = state
            .job_tasks
            .get(&job)
            .ok_or_else(|| SpiderError::not_found("job", job))?;
        let mut edges = Vec::new();
        for &child in ids {
            let mut parents: Vec<TaskId> = state.graph.parents(child).collect();
            parents.sort();
            edges.extend(parents.into_iter().map(|parent| (parent, child)));
        }
        Ok(edges)
    }

    async fn task_instances(&self, task: TaskId) -> Result<Vec<TaskInstance>> {
        let state = self.state.lock().await;
        Ok(state.instances.get(&task).cloned().unwrap_or_default())
    }

    async fn promote_ready(&self, job: Option<JobId>) -> Result<Vec<TaskId>> {
        let mut state = self.state.lock().await;
        let scope: Vec<TaskId> = match job {
            Some(job) => state.job_tasks.get(&job).cloned().unwrap_or_default(),
            None => state.job_tasks.values().flatten().copied().collect(),
        };

        let candidates: Vec<TaskId> = scope
            .into_iter()
            .filter(|id| {
                state
                    .tasks
                    .get(id)
                    .is_some_and(|t| t.state == TaskState::Pending)
                    && state.parents_succeeded(*id)
            })
            .collect();

        let mut promoted = Vec::with_capacity(candidates.len());
        for id in candidates {
            let task = state.task_mut(id)?;
            task.promote()?;
            debug!(task_id = %id, "task ready");
            promoted.push(id);
        }
        Ok(promoted)
    }

    async fn ready_tasks(&self, query: ReadyQuery) -> Result<Vec<TaskRecord>> {
        let state = self.state.lock().await;
        let mut ready: Vec<&TaskRecord> = state
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Ready && !state.leases.contains_key(&t.id))
            .filter(|t| {
                query
                    .address
                    .as_deref()
                    .is_none_or(|address| !state.locality_violation(t, address))
            })
            .collect();
        ready.sort_by_key(|t| t.id);
        Ok(ready.into_iter().take(query.limit).cloned().collect())
    }

    async fn cancel_descendants(&self, task: TaskId) -> Result<Vec<TaskTransition>> {
        let mut state = self.state.lock().await;
        let descendants = state.graph.descendants(task);
        let mut cancelled = Vec::new();
        for id in descendants {
            if let Some(transition) = state.tasks.get_mut(&id).and_then(TaskRecord::cancel) {
                debug!(task_id = %id, cause = %task, "task cancelled by cascade");
                cancelled.push(transition);
            }
        }
        Ok(cancelled)
    }

    async fn cancel_job_tasks(&self, job: JobId) -> Result<Vec<TaskTransition>> {
        let mut state = self.state.lock().await;
        let ids = state
            .job_tasks
            .get(&job)
            .cloned()
            .ok_or_else(|| SpiderError::not_found("job", job))?;
        Ok(ids
            .into_iter()
            .filter_map(|id| state.tasks.get_mut(&id).and_then(TaskRecord::cancel))
            .collect())
    }

    async fn resolve_inputs(&self, task: TaskId) -> Result<Vec<ResolvedInput>> {
        let state = self.state.lock().await;
        let record = state
            .tasks
            .get(&task)
            .ok_or_else(|| SpiderError::not_found("task", task))?;

        let mut inputs = record.inputs.clone();
        inputs.sort_by_key(|i| i.position);
        inputs
            .into_iter()
            .map(|input| -> Result<ResolvedInput> {
                let value = match &input.source {
                    InputSource::Value(bytes) => bytes.clone(),
                    InputSource::Data(id) => state.output_value(&OutputValue::Data(*id))?,
                    InputSource::TaskOutput { task_id, position } => {
                        let producer = state
                            .tasks
                            .get(task_id)
                            .ok_or_else(|| SpiderError::not_found("task", task_id))?;
                        let value = producer
                            .outputs
                            .iter()
                            .find(|o| o.position == *position)
                            .and_then(|o| o.value.as_ref())
                            .ok_or_else(|| {
                                SpiderError::Validation(format!(
                                    "output {position} of {task_id} is not available"
                                ))
                            })?;
                        state.output_value(value)?
                    }
                };
                Ok(ResolvedInput {
                    position: input.position,
                    type_name: input.type_name,
                    value,
                })
            })
            .collect()
    }

    async fn try_acquire(&self, request: AcquireRequest) -> Result<AcquireOutcome> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let AcquireRequest {
            task_id,
            scheduler_id,
            instance_id,
            now,
            ttl: _,
        } = request;

        let address = state
            .schedulers
            .get(&scheduler_id)
            .map(|s| s.address.clone())
            .ok_or_else(|| SpiderError::not_found("scheduler", scheduler_id))?;
        let task = state
            .tasks
            .get(&task_id)
            .ok_or_else(|| SpiderError::not_found("task", task_id))?;

        // An expired row still blocks until someone reclaims it.
        if let Some(lease) = state.leases.get(&task_id) {
            return Ok(AcquireOutcome::Denied(DenyReason::Held {
                holder: lease.scheduler_id,
            }));
        }
        if !task.state.is_leasable() {
            return Ok(AcquireOutcome::Denied(DenyReason::NotReady(task.state)));
        }
        if state.locality_violation(task, &address) {
            return Ok(AcquireOutcome::Denied(DenyReason::Locality { address }));
        }

        let task = state.task_mut(task_id)?;
        task.start(instance_id)?;
        state.instances.entry(task_id).or_default().push(TaskInstance {
            id: instance_id,
            task_id,
            start_time: now,
        });
        let lease = Lease {
            scheduler_id,
            task_id,
            lease_time: now,
        };
        state.leases.insert(task_id, lease.clone());
        debug!(task_id = %task_id, scheduler_id = %scheduler_id, instance_id = %instance_id, "lease granted");
        Ok(AcquireOutcome::Granted(LeaseGrant { lease, instance_id }))
    }

    async fn renew_lease(
        &self,
        task: TaskId,
        scheduler: SchedulerId,
        now: DateTime<Utc>,
    ) -> Result<RenewStatus> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let lost = || SpiderError::LeaseLost {
            task_id: task,
            scheduler_id: scheduler,
        };
        let lease = state
            .leases
            .get_mut(&task)
            .filter(|l| l.scheduler_id == scheduler)
            .ok_or_else(lost)?;
        if state
            .tasks
            .get(&task)
            .is_some_and(|t| t.state == TaskState::Cancel)
        {
            return Ok(RenewStatus::CancelRequested);
        }
        lease.lease_time = now;
        Ok(RenewStatus::Renewed(lease.clone()))
    }

    async fn complete(
        &self,
        completion: Completion,
        decider: &dyn Decider,
    ) -> Result<TaskTransition> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Completion {
            task_id,
            scheduler_id,
            instance_id,
            report,
        } = completion;
        let lost = SpiderError::LeaseLost {
            task_id,
            scheduler_id,
        };

        if !state
            .leases
            .get(&task_id)
            .is_some_and(|l| l.scheduler_id == scheduler_id)
        {
            return Err(lost);
        }
        let task = state
            .tasks
            .get(&task_id)
            .ok_or_else(|| SpiderError::not_found("task", task_id))?;

        if task.state == TaskState::Cancel {
            state.leases.remove(&task_id);
            debug!(task_id = %task_id, "outcome discarded for cancelled task");
            return Ok(TaskTransition {
                task_id,
                job_id: task.job_id,
                from: TaskState::Cancel,
                to: TaskState::Cancel,
                retry: task.retry,
            });
        }
        if task.state != TaskState::Running || task.instance_id != Some(instance_id) {
            return Err(lost);
        }

        let cause = match &report {
            TaskReport::Success { outputs } => match state.check_outputs(task, outputs) {
                Ok(()) => None,
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "rejecting success report");
                    Some(FailureCause::Reported(err.to_string()))
                }
            },
            other => other.failure_cause(),
        };
        let decision = cause.as_ref().map(|cause| decider.decide(task, cause));

        state.leases.remove(&task_id);
        let transition = match (decision, report) {
            (None, TaskReport::Success { outputs }) => {
                let data: Vec<DataId> = outputs
                    .iter()
                    .filter_map(|o| match o {
                        OutputValue::Data(id) => Some(*id),
                        OutputValue::Value(_) => None,
                    })
                    .collect();
                let task = state.task_mut(task_id)?;
                task.outputs.sort_by_key(|o| o.position);
                for (slot, value) in task.outputs.iter_mut().zip(outputs) {
                    slot.value = Some(value);
                }
                let transition = task.succeed()?;
                for id in data {
                    state.add_task_ref(id, task_id);
                }
                transition
            }
            (Some(decision), _) => {
                let task = state.task_mut(task_id)?;
                info!(task_id = %task_id, decision = ?decision, "attempt failed");
                task.apply(&decision)?
            }
            (None, _) => {
                return Err(SpiderError::Store(format!(
                    "failure report for {task_id} produced no decision"
                )));
            }
        };
        debug!(task_id = %task_id, to = %transition.to, "lease released");
        Ok(transition)
    }

    async fn lease(&self, task: TaskId) -> Result<Option<Lease>> {
        Ok(self.state.lock().await.leases.get(&task).cloned())
    }

    async fn expired_leases(&self, now: DateTime<Utc>, ttl: Duration) -> Result<Vec<Lease>> {
        let state = self.state.lock().await;
        let mut expired: Vec<Lease> = state
            .leases
            .values()
            .filter(|l| l.is_expired(now, ttl))
            .cloned()
            .collect();
        expired.sort_by_key(|l| (l.lease_time, l.task_id));
        Ok(expired)
    }

    async fn reclaim(
        &self,
        task: TaskId,
        now: DateTime<Utc>,
        ttl: Duration,
        decider: &dyn Decider,
    ) -> Result<Option<TaskTransition>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(lease) = state.leases.get(&task).filter(|l| l.is_expired(now, ttl)) else {
            return Ok(None);
        };
        let holder = lease.scheduler_id;
        state.leases.remove(&task);

        let record = state.task_mut(task)?;
        if record.state != TaskState::Running {
            // Cancelled while running: dropping the lease is all that is left.
            return Ok(None);
        }
        let decision = decider.decide(record, &FailureCause::LeaseExpired);
        let transition = record.apply(&decision)?;
        warn!(task_id = %task, holder = %holder, to = %transition.to, "expired lease reclaimed");
        Ok(Some(transition))
    }

    async fn put_data(&self, data: DataRecord) -> Result<DataId> {
        if data.id != DataId::for_content(&data.value) {
            return Err(SpiderError::Validation(format!(
                "{} does not match its content",
                data.id
            )));
        }
        let mut state = self.state.lock().await;
        let id = data.id;
        match state.data.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(data);
            }
            // Same content again: a pin or address is only ever added.
            Entry::Occupied(mut slot) => {
                let stored = slot.get_mut();
                if data.hard_locality && !stored.hard_locality {
                    debug!(data_id = %id, "data pinned by a later put");
                    stored.hard_locality = true;
                }
                for address in data.locality {
                    if !stored.locality.contains(&address) {
                        stored.locality.push(address);
                    }
                }
            }
        }
        Ok(id)
    }

    async fn data(&self, id: DataId) -> Result<Option<DataRecord>> {
        Ok(self.state.lock().await.data.get(&id).cloned())
    }

    async fn add_data_locality(&self, id: DataId, address: String) -> Result<()> {
        let mut state = self.state.lock().await;
        let data = state
            .data
            .get_mut(&id)
            .ok_or_else(|| SpiderError::not_found("data", id))?;
        if !data.locality.contains(&address) {
            data.locality.push(address);
        }
        Ok(())
    }

    async fn add_data_driver_ref(&self, id: DataId, driver: DriverId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.data_exists(id)?;
        if !state.drivers.contains_key(&driver) {
            return Err(SpiderError::not_found("driver", driver));
        }
        state.data_driver_refs.entry(id).or_default().insert(driver);
        Ok(())
    }

    async fn remove_data_driver_ref(&self, id: DataId, driver: DriverId) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(refs) = state.data_driver_refs.get_mut(&id) {
            refs.remove(&driver);
            if refs.is_empty() {
                state.data_driver_refs.remove(&id);
            }
        }
        Ok(())
    }

    async fn add_data_task_ref(&self, id: DataId, task: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.data_exists(id)?;
        if !state.tasks.contains_key(&task) {
            return Err(SpiderError::not_found("task", task));
        }
        state.add_task_ref(id, task);
        Ok(())
    }

    async fn remove_data_task_ref(&self, id: DataId, task: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(refs) = state.data_task_refs.get_mut(&id) {
            refs.remove(&task);
            if refs.is_empty() {
                state.data_task_refs.remove(&id);
            }
        }
        Ok(())
    }

    async fn mark_data_persisted(&self, id: DataId) -> Result<()> {
        let mut state = self.state.lock().await;
        let data = state
            .data
            .get_mut(&id)
            .ok_or_else(|| SpiderError::not_found("data", id))?;
        data.persisted = true;
        Ok(())
    }

    async fn collect_garbage(&self) -> Result<Vec<DataId>> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let mut garbage: Vec<DataId> = state
            .data
            .values()
            .filter(|d| {
                !d.persisted
                    && !state.data_driver_refs.contains_key(&d.id)
                    && !state.data_task_refs.contains_key(&d.id)
            })
            .map(|d| d.id)
            .collect();
        garbage.sort();
        for id in &garbage {
            state.data.remove(id);
        }
        if !garbage.is_empty() {
            info!(count = garbage.len(), "unreferenced data collected");
        }
        Ok(garbage)
    }

    async fn put_client_kv(&self, client: DriverId, key: &str, value: Vec<u8>) -> Result<()> {
        validate_kv_key(key)?;
        let mut state = self.state.lock().await;
        if !state.drivers.contains_key(&client) {
            return Err(SpiderError::not_found("driver", client));
        }
        state.client_kv.insert((client, key.to_owned()), value);
        Ok(())
    }

    async fn client_kv(&self, client: DriverId, key: &str) -> Result<Option<Vec<u8>>> {
        validate_kv_key(key)?;
        let state = self.state.lock().await;
        Ok(state.client_kv.get(&(client, key.to_owned())).cloned())
    }

    async fn put_task_kv(&self, task: TaskId, key: &str, value: Vec<u8>) -> Result<()> {
        validate_kv_key(key)?;
        let mut state = self.state.lock().await;
        if !state.tasks.contains_key(&task) {
            return Err(SpiderError::not_found("task", task));
        }
        state.task_kv.insert((task, key.to_owned()), value);
        Ok(())
    }

    async fn task_kv(&self, task: TaskId, key: &str) -> Result<Option<Vec<u8>>> {
        validate_kv_key(key)?;
        let state = self.state.lock().await;
        Ok(state.task_kv.get(&(task, key.to_owned())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DefaultDecider, InstanceId, JobBuilder, Language, TaskSpec};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    async fn store_with_scheduler(address: &str) -> (InMemoryTaskStore, SchedulerId, DriverId) {
        let store = InMemoryTaskStore::new();
        let scheduler = SchedulerId::random();
        let driver = DriverId::random();
        store
            .register_scheduler(SchedulerRecord::new(scheduler, address, 6000, t0()))
            .await
            .unwrap();
        store.register_driver(driver, t0()).await.unwrap();
        (store, scheduler, driver)
    }

    async fn single_task_job(store: &InMemoryTaskStore, driver: DriverId, spec: TaskSpec) -> TaskId {
        let mut job = JobBuilder::new(driver);
        let task = job.add_task(spec);
        let plan = job.build().into_plan(JobId::random(), t0()).unwrap();
        store.insert_job(plan).await.unwrap();
        store.promote_ready(None).await.unwrap();
        task
    }

    fn request(task: TaskId, scheduler: SchedulerId) -> AcquireRequest {
        AcquireRequest {
            task_id: task,
            scheduler_id: scheduler,
            instance_id: InstanceId::random(),
            now: t0(),
            ttl: Duration::seconds(30),
        }
    }

    #[tokio::test]
    async fn second_acquire_is_denied() {
        let (store, s1, driver) = store_with_scheduler("10.0.0.1").await;
        let s2 = SchedulerId::random();
        store
            .register_scheduler(SchedulerRecord::new(s2, "10.0.0.2", 6000, t0()))
            .await
            .unwrap();
        let task = single_task_job(&store, driver, TaskSpec::new("f", Language::Cpp)).await;

        assert!(store.try_acquire(request(task, s1)).await.unwrap().is_granted());
        let denied = store.try_acquire(request(task, s2)).await.unwrap();
        assert_eq!(denied, AcquireOutcome::Denied(DenyReason::Held { holder: s1 }));
        assert_eq!(store.task_instances(task).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_scheduler_cannot_acquire() {
        let (store, _, driver) = store_with_scheduler("10.0.0.1").await;
        let task = single_task_job(&store, driver, TaskSpec::new("f", Language::Cpp)).await;
        let err = store
            .try_acquire(request(task, SchedulerId::random()))
            .await
            .unwrap_err();
        assert!(matches!(err, SpiderError::NotFound { entity: "scheduler", .. }));
    }

    #[tokio::test]
    async fn success_with_wrong_output_count_is_a_failure() {
        let (store, scheduler, driver) = store_with_scheduler("10.0.0.1").await;
        let task = single_task_job(
            &store,
            driver,
            TaskSpec::new("f", Language::Python).with_output("int"),
        )
        .await;
        let grant = store
            .try_acquire(request(task, scheduler))
            .await
            .unwrap()
            .granted()
            .unwrap();

        let transition = store
            .complete(
                Completion {
                    task_id: task,
                    scheduler_id: scheduler,
                    instance_id: grant.instance_id,
                    report: TaskReport::success(vec![]),
                },
                &DefaultDecider::default(),
            )
            .await
            .unwrap();
        assert_eq!(transition.to, TaskState::Fail);
        assert!(store.lease(task).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_instance_cannot_complete() {
        let (store, scheduler, driver) = store_with_scheduler("10.0.0.1").await;
        let task = single_task_job(&store, driver, TaskSpec::new("f", Language::Cpp)).await;
        store.try_acquire(request(task, scheduler)).await.unwrap();

        let err = store
            .complete(
                Completion {
                    task_id: task,
                    scheduler_id: scheduler,
                    instance_id: InstanceId::random(),
                    report: TaskReport::success(vec![]),
                },
                &DefaultDecider::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SpiderError::LeaseLost { .. }));
        assert!(store.lease(task).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn garbage_collection_spares_referenced_and_persisted_data() {
        let (store, _, driver) = store_with_scheduler("10.0.0.1").await;
        let loose = store.put_data(DataRecord::new(b"loose".to_vec(), false)).await.unwrap();
        let owned = store.put_data(DataRecord::new(b"owned".to_vec(), false)).await.unwrap();
        let kept = store.put_data(DataRecord::new(b"kept".to_vec(), false)).await.unwrap();
        store.add_data_driver_ref(owned, driver).await.unwrap();
        store.mark_data_persisted(kept).await.unwrap();

        assert_eq!(store.collect_garbage().await.unwrap(), vec![loose]);
        assert!(store.data(owned).await.unwrap().is_some());
        assert!(store.data(kept).await.unwrap().is_some());

        store.remove_data_driver_ref(owned, driver).await.unwrap();
        assert_eq!(store.collect_garbage().await.unwrap(), vec![owned]);
    }

    #[tokio::test]
    async fn repeated_put_keeps_the_strongest_pin() {
        let (store, _, _) = store_with_scheduler("10.0.0.1").await;
        let loose = store.put_data(DataRecord::new(b"blob".to_vec(), false)).await.unwrap();
        let pinned = store.put_data(DataRecord::new(b"blob".to_vec(), true)).await.unwrap();
        assert_eq!(loose, pinned);
        assert!(store.data(loose).await.unwrap().unwrap().hard_locality);

        // a later unpinned put does not release the pin
        store.put_data(DataRecord::new(b"blob".to_vec(), false)).await.unwrap();
        let record = store.data(loose).await.unwrap().unwrap();
        assert!(record.hard_locality);
        assert!(!record.reachable_from("10.0.0.1"));
    }

    #[tokio::test]
    async fn driver_heartbeat_moves_forward() {
        let (store, _, driver) = store_with_scheduler("10.0.0.1").await;
        let later = t0() + Duration::seconds(5);
        store.heartbeat_driver(driver, later).await.unwrap();
        assert_eq!(store.driver(driver).await.unwrap().unwrap().heartbeat, later);

        let err = store
            .heartbeat_driver(DriverId::random(), later)
            .await
            .unwrap_err();
        assert!(matches!(err, SpiderError::NotFound { entity: "driver", .. }));
    }

    #[tokio::test]
    async fn schedulers_go_stale_strictly_after_the_timeout() {
        let (store, quiet, _) = store_with_scheduler("10.0.0.1").await;
        let busy = SchedulerId::random();
        store
            .register_scheduler(SchedulerRecord::new(busy, "10.0.0.2", 6000, t0()))
            .await
            .unwrap();
        let timeout = Duration::seconds(10);
        store.heartbeat_scheduler(busy, t0() + Duration::seconds(8)).await.unwrap();

        assert!(store.stale_schedulers(t0() + timeout, timeout).await.unwrap().is_empty());
        let stale = store
            .stale_schedulers(t0() + timeout + Duration::seconds(1), timeout)
            .await
            .unwrap();
        assert_eq!(stale.iter().map(|s| s.id).collect::<Vec<_>>(), vec![quiet]);
    }

    #[tokio::test]
    async fn job_dependencies_lists_parent_child_edges() {
        let (store, _, driver) = store_with_scheduler("10.0.0.1").await;
        let mut job = JobBuilder::new(driver);
        let a = job.add_task(TaskSpec::new("a", Language::Cpp));
        let b = job.add_task(TaskSpec::new("b", Language::Cpp));
        let c = job.add_task(TaskSpec::new("c", Language::Cpp));
        job.depends(a, c).depends(b, c);
        let job_id = JobId::random();
        store
            .insert_job(job.build().into_plan(job_id, t0()).unwrap())
            .await
            .unwrap();

        let mut edges = store.job_dependencies(job_id).await.unwrap();
        edges.sort();
        let mut expected = vec![(a, c), (b, c)];
        expected.sort();
        assert_eq!(edges, expected);
        assert!(matches!(
            store.job_dependencies(JobId::random()).await,
            Err(SpiderError::NotFound { entity: "job", .. })
        ));
    }

    #[tokio::test]
    async fn kv_keys_are_bounded() {
        let (store, _, driver) = store_with_scheduler("10.0.0.1").await;
        store.put_client_kv(driver, "k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.client_kv(driver, "k").await.unwrap(), Some(b"v".to_vec()));
        let err = store
            .put_client_kv(driver, &"k".repeat(65), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, SpiderError::Validation(_)));
    }
}
