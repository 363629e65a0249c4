//! End-to-end scheduling scenarios over the in-memory store.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use spider_core::SchedulerConfig;
use spider_core::app::{JobOrchestrator, LeaseManager, SchedulerCoordinator};
use spider_core::bootstrap::{
    BootstrapConfig, DatabaseConfig, ProvisionPlan, SpiderDbConfig, ensure_indexes,
};
use spider_core::domain::{
    AcquireOutcome, Completion, DataRecord, DefaultDecider, DenyReason, DriverId, InputSource,
    JobBuilder, JobId, JobSpec, JobState, Language, OutputValue, RenewStatus, ResolvedInput,
    SchedulerId, SchedulerRecord, SpiderError, TaskId, TaskReport, TaskSpec, TaskState,
};
use spider_core::impls::{
    FunctionRegistry, InMemoryResultsCache, InMemoryTaskStore, RecordingAdmin, TaskFunction,
};
use spider_core::ports::{
    Clock, FixedClock, IdGenerator, SystemClock, TaskExecutor, TaskStore, UlidGenerator, next_id,
};
use tokio::sync::watch;

const TTL_SECS: i64 = 30;

struct Harness {
    store: Arc<dyn TaskStore>,
    clock: Arc<FixedClock>,
    leases: LeaseManager,
    jobs: JobOrchestrator,
    driver: DriverId,
    s1: SchedulerId,
    s2: SchedulerId,
}

impl Harness {
    async fn new() -> Self {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));
        let leases = LeaseManager::new(
            Arc::clone(&store),
            Arc::clone(&dyn_clock),
            Arc::clone(&ids),
            Arc::new(DefaultDecider::default()),
            Duration::seconds(TTL_SECS),
        );
        let jobs = JobOrchestrator::new(Arc::clone(&store), dyn_clock, ids);

        let driver = DriverId::random();
        let (s1, s2) = (SchedulerId::random(), SchedulerId::random());
        store.register_driver(driver, clock.now()).await.unwrap();
        for (id, address) in [(s1, "10.0.0.1"), (s2, "10.0.0.2")] {
            store
                .register_scheduler(SchedulerRecord::new(id, address, 6000, clock.now()))
                .await
                .unwrap();
        }
        Self {
            store,
            clock,
            leases,
            jobs,
            driver,
            s1,
            s2,
        }
    }

    /// `a -> b`, where b consumes a's only output.
    fn chain(&self, max_retry: u32) -> (JobSpec, TaskId, TaskId) {
        let mut job = JobBuilder::new(self.driver);
        let a = job.add_task(
            TaskSpec::new("produce", Language::Cpp)
                .with_max_retry(max_retry)
                .with_input("int", InputSource::Value(vec![1]))
                .with_output("int"),
        );
        let b = job.add_task(
            TaskSpec::new("consume", Language::Cpp)
                .with_input("int", InputSource::TaskOutput { task_id: a, position: 0 })
                .with_output("int"),
        );
        job.depends(a, b).input_task(a).output_task(b);
        (job.build(), a, b)
    }

    async fn state(&self, task: TaskId) -> TaskState {
        self.store.task(task).await.unwrap().unwrap().state
    }

    async fn run_attempt(&self, task: TaskId, scheduler: SchedulerId, report: TaskReport) -> JobState {
        let grant = self
            .leases
            .acquire(task, scheduler)
            .await
            .unwrap()
            .into_grant(task)
            .expect("lease granted");
        let transition = self
            .leases
            .release(Completion {
                task_id: task,
                scheduler_id: scheduler,
                instance_id: grant.instance_id,
                report,
            })
            .await
            .unwrap();
        self.jobs.on_task_released(&transition).await.unwrap()
    }
}

fn value(byte: u8) -> Vec<OutputValue> {
    vec![OutputValue::Value(vec![byte])]
}

#[tokio::test]
async fn parent_success_makes_child_ready() {
    let h = Harness::new().await;
    let (spec, a, b) = h.chain(0);
    let job = h.jobs.submit(spec).await.unwrap();
    assert_eq!(h.state(a).await, TaskState::Ready);
    assert_eq!(h.state(b).await, TaskState::Pending);

    assert_eq!(h.run_attempt(a, h.s1, TaskReport::success(value(2))).await, JobState::Running);
    assert_eq!(h.state(b).await, TaskState::Ready);
    let inputs = h.store.resolve_inputs(b).await.unwrap();
    assert_eq!(inputs[0].value, vec![2]);

    assert_eq!(h.run_attempt(b, h.s2, TaskReport::success(value(3))).await, JobState::Success);
    let outputs = h.jobs.job_outputs(job).await.unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].0, b);
    assert_eq!(outputs[0].1[0].value, Some(OutputValue::Value(vec![3])));
}

#[tokio::test]
async fn failure_without_retries_cancels_dependents() {
    let h = Harness::new().await;
    let (spec, a, b) = h.chain(0);
    let job = h.jobs.submit(spec).await.unwrap();

    let state = h.run_attempt(a, h.s1, TaskReport::failure("boom")).await;
    assert_eq!(state, JobState::Fail);
    assert_eq!(h.state(a).await, TaskState::Fail);
    assert_eq!(h.state(b).await, TaskState::Cancel);
    assert!(matches!(
        h.jobs.job_outputs(job).await,
        Err(SpiderError::Validation(_))
    ));
}

#[tokio::test]
async fn failure_within_budget_is_retried() {
    let h = Harness::new().await;
    let (spec, a, _) = h.chain(1);
    h.jobs.submit(spec).await.unwrap();

    h.run_attempt(a, h.s1, TaskReport::failure("flaky")).await;
    let task = h.store.task(a).await.unwrap().unwrap();
    assert_eq!((task.state, task.retry), (TaskState::Ready, 1));

    h.run_attempt(a, h.s2, TaskReport::success(value(1))).await;
    assert_eq!(h.state(a).await, TaskState::Success);
    assert_eq!(h.store.task_instances(a).await.unwrap().len(), 2);
}

#[tokio::test]
async fn expired_lease_moves_to_another_scheduler() {
    let h = Harness::new().await;
    let (spec, a, _) = h.chain(0);
    h.jobs.submit(spec).await.unwrap();
    let first = h.leases.acquire(a, h.s1).await.unwrap().granted().unwrap();

    h.clock.advance(Duration::seconds(TTL_SECS));
    assert_eq!(
        h.leases.acquire(a, h.s2).await.unwrap(),
        AcquireOutcome::Denied(DenyReason::Held { holder: h.s1 })
    );

    h.clock.advance(Duration::seconds(1));
    let reclaimed = h.leases.reclaim_expired().await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(h.state(a).await, TaskState::Ready);

    let second = h.leases.acquire(a, h.s2).await.unwrap().granted().unwrap();
    assert_ne!(first.instance_id, second.instance_id);
    // lease expiry is not charged against the retry budget
    assert_eq!(h.store.task(a).await.unwrap().unwrap().retry, 0);

    let late = h
        .leases
        .release(Completion {
            task_id: a,
            scheduler_id: h.s1,
            instance_id: first.instance_id,
            report: TaskReport::success(value(9)),
        })
        .await
        .unwrap_err();
    assert!(matches!(late, SpiderError::LeaseLost { .. }));
    assert!(matches!(
        h.leases.renew(a, h.s1).await,
        Err(SpiderError::LeaseLost { .. })
    ));
    assert_eq!(h.state(a).await, TaskState::Running);
}

#[tokio::test]
async fn cancel_is_idempotent_and_reaches_the_holder() {
    let h = Harness::new().await;
    let (spec, a, b) = h.chain(0);
    let job = h.jobs.submit(spec).await.unwrap();
    let grant = h.leases.acquire(a, h.s1).await.unwrap().granted().unwrap();

    assert_eq!(h.jobs.cancel(job).await.unwrap(), JobState::Cancel);
    assert_eq!(h.jobs.cancel(job).await.unwrap(), JobState::Cancel);
    assert_eq!(h.state(b).await, TaskState::Cancel);

    assert_eq!(h.leases.renew(a, h.s1).await.unwrap(), RenewStatus::CancelRequested);
    let transition = h
        .leases
        .release(Completion {
            task_id: a,
            scheduler_id: h.s1,
            instance_id: grant.instance_id,
            report: TaskReport::success(value(1)),
        })
        .await
        .unwrap();
    assert_eq!((transition.from, transition.to), (TaskState::Cancel, TaskState::Cancel));
    assert!(h.store.lease(a).await.unwrap().is_none());

    let status = h.jobs.status(job).await.unwrap();
    assert_eq!(status.state, JobState::Cancel);
    assert_eq!(status.tasks.cancel, 2);
}

#[tokio::test]
async fn hard_locality_limits_who_can_lease() {
    let h = Harness::new().await;
    let data = h
        .store
        .put_data(DataRecord::new(b"pinned".to_vec(), true))
        .await
        .unwrap();
    h.store.add_data_locality(data, "10.0.0.1".into()).await.unwrap();

    let mut job = JobBuilder::new(h.driver);
    let task = job.add_task(TaskSpec::new("read", Language::Python).with_input("bytes", InputSource::Data(data)));
    h.jobs.submit(job.build()).await.unwrap();

    assert_eq!(
        h.leases.acquire(task, h.s2).await.unwrap(),
        AcquireOutcome::Denied(DenyReason::Locality {
            address: "10.0.0.2".into()
        })
    );
    assert!(h.leases.acquire(task, h.s1).await.unwrap().is_granted());
}

#[tokio::test]
async fn deleting_a_job_keeps_its_data() {
    let h = Harness::new().await;
    let data = h
        .store
        .put_data(DataRecord::new(b"input".to_vec(), false))
        .await
        .unwrap();
    let mut job = JobBuilder::new(h.driver);
    job.add_task(TaskSpec::new("read", Language::Cpp).with_input("bytes", InputSource::Data(data)));
    let job = h.jobs.submit(job.build()).await.unwrap();

    let report = h.jobs.delete_job(job).await.unwrap();
    assert_eq!((report.jobs, report.tasks, report.data_refs), (1, 1, 1));
    assert!(h.store.job(job).await.unwrap().is_none());
    assert!(h.store.data(data).await.unwrap().is_some());

    // with the task reference gone, the blob is garbage
    assert_eq!(h.store.collect_garbage().await.unwrap(), vec![data]);
    assert!(matches!(
        h.jobs.status(job).await,
        Err(SpiderError::NotFound { entity: "job", .. })
    ));
}

#[tokio::test]
async fn invalid_job_writes_nothing() {
    let h = Harness::new().await;
    let mut job = JobBuilder::new(h.driver);
    let a = job.add_task(TaskSpec::new("a", Language::Cpp));
    let b = job.add_task(TaskSpec::new("b", Language::Cpp));
    job.depends(a, b).depends(b, a);

    assert!(matches!(h.jobs.submit(job.build()).await, Err(SpiderError::Structural(_))));
    assert!(h.store.task(a).await.unwrap().is_none());
    assert!(h.store.jobs_in_state(JobState::Running).await.unwrap().is_empty());
}

fn quick_config() -> SchedulerConfig {
    SchedulerConfig {
        lease_ttl_ms: 2_000,
        poll_interval_ms: 10,
        heartbeat_interval_ms: 200,
        ..SchedulerConfig::default()
    }
}

async fn wait_until_terminal(jobs: &JobOrchestrator, job: JobId) -> JobState {
    tokio::time::timeout(StdDuration::from_secs(10), async {
        loop {
            let state = jobs.status(job).await.unwrap().state;
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    })
    .await
    .expect("job finished in time")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn coordinators_run_a_job_to_completion() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));

    let mut registry = FunctionRegistry::new();
    registry
        .register_fn("double", |inputs| {
            let byte = inputs.first().and_then(|i| i.value.first().copied()).unwrap_or(0);
            Ok(vec![OutputValue::Value(vec![byte * 2])])
        })
        .unwrap();
    let executor: Arc<dyn TaskExecutor> = Arc::new(registry);

    let driver = DriverId::random();
    store.register_driver(driver, clock.now()).await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();
    for _ in 0..2 {
        let coordinator = Arc::new(SchedulerCoordinator::new(
            next_id(ids.as_ref()),
            quick_config(),
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&ids),
            Arc::clone(&executor),
        ));
        handles.push(tokio::spawn(coordinator.run(shutdown_rx.clone())));
    }

    let jobs = JobOrchestrator::new(Arc::clone(&store), clock, ids);
    let mut builder = JobBuilder::new(driver);
    let mut previous = builder.add_task(
        TaskSpec::new("double", Language::Cpp)
            .with_input("u8", InputSource::Value(vec![1]))
            .with_output("u8"),
    );
    for _ in 0..4 {
        let next = builder.add_task(
            TaskSpec::new("double", Language::Cpp)
                .with_input("u8", InputSource::TaskOutput { task_id: previous, position: 0 })
                .with_output("u8"),
        );
        builder.depends(previous, next);
        previous = next;
    }
    builder.output_task(previous);
    let job = jobs.submit(builder.build()).await.unwrap();

    assert_eq!(wait_until_terminal(&jobs, job).await, JobState::Success);
    let outputs = jobs.job_outputs(job).await.unwrap();
    assert_eq!(outputs[0].1[0].value, Some(OutputValue::Value(vec![32])));

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn unknown_function_fails_the_task() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));
    let driver = DriverId::random();
    store.register_driver(driver, clock.now()).await.unwrap();

    let coordinator = Arc::new(SchedulerCoordinator::new(
        SchedulerId::random(),
        quick_config(),
        Arc::clone(&store),
        Arc::clone(&clock),
        Arc::clone(&ids),
        Arc::new(FunctionRegistry::new()),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&coordinator).run(shutdown_rx));

    let mut builder = JobBuilder::new(driver);
    builder.add_task(TaskSpec::new("missing", Language::Python));
    let job = coordinator.orchestrator().submit(builder.build()).await.unwrap();

    assert_eq!(wait_until_terminal(coordinator.orchestrator(), job).await, JobState::Fail);
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

/// Never finishes within any reasonable timeout.
struct Sleeper;

#[async_trait]
impl TaskFunction for Sleeper {
    async fn call(&self, _inputs: Vec<ResolvedInput>) -> Result<Vec<OutputValue>, String> {
        tokio::time::sleep(StdDuration::from_secs(5)).await;
        Ok(vec![])
    }
}

#[tokio::test]
async fn timed_out_task_is_retried_then_fails_and_cascades() {
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));
    let driver = DriverId::random();
    store.register_driver(driver, clock.now()).await.unwrap();

    let mut registry = FunctionRegistry::new();
    registry.register("sleep", Arc::new(Sleeper)).unwrap();
    registry.register_fn("noop", |_| Ok(vec![])).unwrap();
    let coordinator = Arc::new(SchedulerCoordinator::new(
        SchedulerId::random(),
        quick_config(),
        Arc::clone(&store),
        Arc::clone(&clock),
        Arc::clone(&ids),
        Arc::new(registry),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&coordinator).run(shutdown_rx));

    let mut builder = JobBuilder::new(driver);
    let slow = builder.add_task(
        TaskSpec::new("sleep", Language::Cpp)
            .with_timeout(0.1)
            .with_max_retry(1),
    );
    let child = builder.add_task(TaskSpec::new("noop", Language::Cpp));
    builder.depends(slow, child);
    let job = coordinator.orchestrator().submit(builder.build()).await.unwrap();

    assert_eq!(wait_until_terminal(coordinator.orchestrator(), job).await, JobState::Fail);
    let slow_record = store.task(slow).await.unwrap().unwrap();
    assert_eq!((slow_record.state, slow_record.retry), (TaskState::Fail, 1));
    assert_eq!(store.task_instances(slow).await.unwrap().len(), 2);
    assert_eq!(store.task(child).await.unwrap().unwrap().state, TaskState::Cancel);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn provisioning_creates_every_table_in_the_scheduler_database() {
    let config = BootstrapConfig {
        database: DatabaseConfig {
            host: "localhost".into(),
            port: 3306,
            username: Some("root".into()),
            password: Some("root-pass".into()),
        },
        spider_db: Some(SpiderDbConfig {
            name: "spider-db".into(),
            username: Some("spider".into()),
            password: Some("s3cret".into()),
        }),
    };
    let plan = ProvisionPlan::from_config(&config).unwrap().unwrap();
    let admin = RecordingAdmin::new();
    plan.apply(&admin).await.unwrap();

    let statements = admin.statements().await;
    let (schema, admin_statements): (Vec<_>, Vec<_>) =
        statements.iter().partition(|s| s.database.is_some());
    assert_eq!(schema.len(), 17);
    assert!(schema.iter().all(|s| s.database.as_deref() == Some("spider-db")));
    assert!(!admin_statements.is_empty());
    // admin statements come first
    assert!(statements[..admin_statements.len()].iter().all(|s| s.database.is_none()));
}

#[tokio::test]
async fn malicious_database_name_is_rejected() {
    let config = BootstrapConfig {
        database: DatabaseConfig {
            host: "localhost".into(),
            port: 3306,
            username: Some("root".into()),
            password: None,
        },
        spider_db: Some(SpiderDbConfig {
            name: "spider`; DROP DATABASE mysql; --".into(),
            username: Some("spider".into()),
            password: None,
        }),
    };
    assert!(matches!(
        ProvisionPlan::from_config(&config),
        Err(SpiderError::Validation(_))
    ));
}

#[tokio::test]
async fn results_cache_indexes_are_created_once() {
    let cache = InMemoryResultsCache::new();
    let first = ensure_indexes(&cache, "stream-files").await.unwrap();
    assert!(!first.is_empty());
    assert!(cache.is_replica_set().await);
    assert!(ensure_indexes(&cache, "stream-files").await.unwrap().is_empty());
}
