//! `spider simulate`: several coordinators sharing one in-memory store.
//!
//! Submits a generated job (a chain with a diamond every third task), runs
//! it to a terminal state and prints the final status as JSON. Every task
//! runs `add`: sum the u64 inputs and add one.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use spider_core::SchedulerConfig;
use spider_core::app::{GcLoop, JobOrchestrator, SchedulerCoordinator};
use spider_core::config::load_and_validate;
use spider_core::domain::{
    DriverId, InputSource, JobBuilder, JobId, JobSpec, JobState, JobStatus, Language, OutputValue,
    ResolvedInput, TaskId, TaskSpec,
};
use spider_core::impls::{FunctionRegistry, InMemoryTaskStore, TaskFunction};
use spider_core::ports::{Clock, IdGenerator, SystemClock, TaskExecutor, TaskStore, UlidGenerator, next_id};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cli::SimulateArgs;

const ADD: &str = "add";
const U64: &str = "u64";

pub async fn run(args: SimulateArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_and_validate(path).with_context(|| format!("loading {}", path.display()))?,
        None => quick_config(),
    };
    let status = simulate(&args, config).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    if status.state != JobState::Success {
        bail!("job {} finished as {:?}", status.job_id, status.state);
    }
    Ok(())
}

/// Short lease and poll periods so a local run finishes in well under a second.
fn quick_config() -> SchedulerConfig {
    SchedulerConfig {
        lease_ttl_ms: 2_000,
        poll_interval_ms: 20,
        heartbeat_interval_ms: 500,
        ..SchedulerConfig::default()
    }
}

async fn simulate(args: &SimulateArgs, config: SchedulerConfig) -> Result<JobStatus> {
    if args.schedulers == 0 || args.tasks == 0 {
        bail!("--schedulers and --tasks must be positive");
    }

    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(SystemClock));

    let mut registry = FunctionRegistry::new();
    registry.register(ADD, Arc::new(FlakyAdd::new(args.fail_every)))?;
    let executor: Arc<dyn TaskExecutor> = Arc::new(registry);

    let driver = DriverId::random();
    store.register_driver(driver, clock.now()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut coordinators = JoinSet::new();
    for _ in 0..args.schedulers {
        let coordinator = Arc::new(SchedulerCoordinator::new(
            next_id(ids.as_ref()),
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&ids),
            Arc::clone(&executor),
        ));
        coordinators.spawn(coordinator.run(shutdown_rx.clone()));
    }
    let gc = GcLoop::new(Arc::clone(&store));
    let gc_shutdown = shutdown_rx.clone();
    let gc_interval = config.heartbeat_interval();
    let gc_handle = tokio::spawn(async move { gc.run(gc_interval, gc_shutdown).await });

    let orchestrator = JobOrchestrator::new(Arc::clone(&store), Arc::clone(&clock), ids);
    let (spec, output) = build_job(driver, args.tasks, args.max_retry);
    let job = orchestrator.submit(spec).await?;
    info!(job_id = %job, tasks = args.tasks, schedulers = args.schedulers, "simulation started");

    let deadline = Duration::from_secs(args.timeout_secs);
    let outcome = tokio::select! {
        waited = tokio::time::timeout(deadline, wait_for_terminal(&orchestrator, job, config.poll_interval())) => {
            waited.map_err(|_| anyhow!("job {job} did not finish within {}s", args.timeout_secs)).and_then(|r| r)
        }
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %job, "interrupted, cancelling job");
            match orchestrator.cancel(job).await {
                Ok(_) => orchestrator.status(job).await.map_err(Into::into),
                Err(err) => Err(err.into()),
            }
        }
    };

    let _ = shutdown_tx.send(true);
    while let Some(joined) = coordinators.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "coordinator exited with error"),
            Err(err) => warn!(error = %err, "coordinator task panicked"),
        }
    }
    if let Err(err) = gc_handle.await {
        warn!(error = %err, "gc task panicked");
    }

    let status = outcome?;
    if status.state == JobState::Success {
        let result = orchestrator
            .job_outputs(job)
            .await?
            .into_iter()
            .find(|(task, _)| *task == output)
            .and_then(|(_, outputs)| outputs.into_iter().next())
            .and_then(|slot| match slot.value {
                Some(OutputValue::Value(bytes)) => decode(&bytes).ok(),
                _ => None,
            });
        info!(job_id = %job, result = ?result, "simulation finished");
    }
    Ok(status)
}

async fn wait_for_terminal(orchestrator: &JobOrchestrator, job: JobId, poll: Duration) -> Result<JobStatus> {
    loop {
        let status = orchestrator.status(job).await?;
        if status.state.is_terminal() {
            return Ok(status);
        }
        tokio::time::sleep(poll).await;
    }
}

/// Build `tasks` chained tasks; every third task also reads its grandparent.
/// Returns the job and its output task.
fn build_job(driver: DriverId, tasks: usize, max_retry: u32) -> (JobSpec, TaskId) {
    let mut job = JobBuilder::new(driver);
    let mut ids: Vec<TaskId> = Vec::with_capacity(tasks);
    for i in 0..tasks {
        let parents: Vec<TaskId> = match i {
            0 => Vec::new(),
            i if i >= 2 && i % 3 == 0 => vec![ids[i - 1], ids[i - 2]],
            i => vec![ids[i - 1]],
        };
        let mut spec = TaskSpec::new(ADD, Language::Cpp)
            .with_max_retry(max_retry)
            .with_output(U64);
        if parents.is_empty() {
            spec = spec.with_input(U64, InputSource::Value(1u64.to_le_bytes().to_vec()));
        }
        for &parent in &parents {
            spec = spec.with_input(
                U64,
                InputSource::TaskOutput {
                    task_id: parent,
                    position: 0,
                },
            );
        }
        let id = job.add_task(spec);
        for parent in parents {
            job.depends(parent, id);
        }
        ids.push(id);
    }
    let first = ids[0];
    let last = ids[tasks - 1];
    job.input_task(first).output_task(last);
    (job.build(), last)
}

fn decode(bytes: &[u8]) -> std::result::Result<u64, String> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| format!("expected 8 bytes, got {}", bytes.len()))?;
    Ok(u64::from_le_bytes(raw))
}

/// `add`, failing on every `fail_every`-th call when non-zero.
struct FlakyAdd {
    calls: AtomicUsize,
    fail_every: usize,
}

impl FlakyAdd {
    fn new(fail_every: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_every,
        }
    }
}

#[async_trait]
impl TaskFunction for FlakyAdd {
    async fn call(&self, inputs: Vec<ResolvedInput>) -> std::result::Result<Vec<OutputValue>, String> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(format!("intentional failure (call {call})"));
        }
        let mut sum = 1u64;
        for input in &inputs {
            sum = sum.wrapping_add(decode(&input.value)?);
        }
        Ok(vec![OutputValue::Value(sum.to_le_bytes().to_vec())])
    }
}
