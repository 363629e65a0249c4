//! SchedulerCoordinator - スケジューラのプロセスループ
//!
//! # フロー（1 iteration）
//! 1. heartbeat（期限が来ていれば）+ reconcile
//! 2. 期限切れ lease の回収（ReaperLoop の 1 pass）
//! 3. ready への昇格
//! 4. ready タスクを取得（自分の address で locality フィルタ）→ acquire
//! 5. 取れたタスクはそれぞれ別の tokio task で実行（renew しながら）
//!
//! 協調はすべて TaskStore 経由。Coordinator 同士は互いを知らない。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::app::backoff::RetryPolicy;
use crate::app::lease_manager::LeaseManager;
use crate::app::orchestrator::JobOrchestrator;
use crate::app::reaper_loop::ReaperLoop;
use crate::app::resolver::DependencyResolver;
use crate::config::SchedulerConfig;
use crate::domain::{
    AcquireOutcome, Completion, DefaultDecider, LeaseGrant, RenewStatus, Result, SchedulerId,
    SchedulerRecord, SpiderError, TaskRecord, TaskReport,
};
use crate::ports::{Assignment, Clock, IdGenerator, ReadyQuery, TaskExecutor, TaskStore};

/// What one iteration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub reclaimed: usize,
    pub promoted: usize,
    pub leased: usize,
    pub denied: usize,
    /// Candidates deleted (with their job) between poll and acquire.
    pub vanished: usize,
}

impl TickReport {
    /// Every candidate was lost to another scheduler.
    pub fn contended(&self) -> bool {
        self.leased == 0 && self.denied > 0
    }
}

/// Loop-local state of [`SchedulerCoordinator::run`].
#[derive(Default)]
pub struct TickState {
    in_flight: JoinSet<()>,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl TickState {
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait for every dispatched task to finish.
    pub async fn drain(&mut self) {
        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "dispatch task panicked");
            }
        }
    }
}

pub struct SchedulerCoordinator {
    id: SchedulerId,
    config: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn TaskExecutor>,
    leases: Arc<LeaseManager>,
    orchestrator: Arc<JobOrchestrator>,
    resolver: DependencyResolver,
    reaper: ReaperLoop,
    backoff: RetryPolicy,
}

impl SchedulerCoordinator {
    pub fn new(
        id: SchedulerId,
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let decider = Arc::new(DefaultDecider::new(config.retry.charge_lease_expiry));
        let leases = Arc::new(LeaseManager::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&ids),
            decider,
            config.lease_ttl(),
        ));
        let orchestrator = Arc::new(JobOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            ids,
        ));
        Self {
            id,
            backoff: RetryPolicy::from(&config.backoff),
            resolver: DependencyResolver::new(Arc::clone(&store)),
            reaper: ReaperLoop::new(Arc::clone(&leases), Arc::clone(&orchestrator)),
            config,
            store,
            clock,
            executor,
            leases,
            orchestrator,
        }
    }

    pub fn id(&self) -> SchedulerId {
        self.id
    }

    pub fn leases(&self) -> &Arc<LeaseManager> {
        &self.leases
    }

    pub fn orchestrator(&self) -> &Arc<JobOrchestrator> {
        &self.orchestrator
    }

    pub async fn register(&self) -> Result<()> {
        self.store
            .register_scheduler(SchedulerRecord::new(
                self.id,
                self.config.address.clone(),
                self.config.port,
                self.clock.now(),
            ))
            .await
    }

    /// Run until `shutdown` flips to true (or its sender is dropped), then
    /// wait for in-flight dispatches.
    ///
    /// Transient errors back off exponentially; permanent ones end the loop.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.register().await?;
        info!(scheduler_id = %self.id, address = %self.config.address, "coordinator started");

        let mut state = TickState::default();
        let mut failures = 0u32;
        let result = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            let delay = match self.tick(&mut state).await {
                Ok(report) if report.contended() => {
                    failures += 1;
                    self.backoff.next_delay(failures)
                }
                Ok(report) => {
                    failures = 0;
                    if report.leased > 0 {
                        Duration::ZERO
                    } else {
                        self.config.poll_interval()
                    }
                }
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    let delay = self.backoff.next_delay(failures);
                    warn!(error = %err, attempt = failures, delay_ms = delay.as_millis() as u64, "coordinator iteration failed");
                    delay
                }
                Err(err) => break Err(err),
            };
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        };

        state.drain().await;
        info!(scheduler_id = %self.id, "coordinator stopped");
        result
    }

    /// One iteration of the loop.
    pub async fn tick(self: &Arc<Self>, state: &mut TickState) -> Result<TickReport> {
        while let Some(joined) = state.in_flight.try_join_next() {
            if let Err(err) = joined {
                error!(error = %err, "dispatch task panicked");
            }
        }

        let now = self.clock.now();
        let heartbeat_due = state.last_heartbeat.is_none_or(|last| {
            (now - last).to_std().unwrap_or_default() >= self.config.heartbeat_interval()
        });
        if heartbeat_due {
            self.store.heartbeat_scheduler(self.id, now).await?;
            let stale = self.store.stale_schedulers(now, self.config.lease_ttl()).await?;
            if !stale.is_empty() {
                let ids: Vec<String> = stale.iter().map(|s| s.id.to_string()).collect();
                debug!(scheduler_id = %self.id, stale = ?ids, "peers missed their heartbeat");
            }
            self.orchestrator.reconcile().await?;
            state.last_heartbeat = Some(now);
        }

        let mut report = TickReport {
            reclaimed: self.reaper.run_once().await?,
            promoted: self.resolver.promote_ready(None).await?.len(),
            ..TickReport::default()
        };

        let capacity = self.config.max_in_flight.saturating_sub(state.in_flight.len());
        if capacity == 0 {
            return Ok(report);
        }
        let candidates = self
            .store
            .ready_tasks(ReadyQuery {
                limit: self.config.batch_size.min(capacity),
                address: Some(self.config.address.clone()),
            })
            .await?;

        for task in candidates {
            match self.leases.acquire(task.id, self.id).await {
                Ok(AcquireOutcome::Granted(grant)) => {
                    report.leased += 1;
                    let this = Arc::clone(self);
                    state.in_flight.spawn(async move { this.dispatch(task, grant).await });
                }
                Ok(AcquireOutcome::Denied(_)) => report.denied += 1,
                Err(err) if err.is_not_found() => {
                    debug!(task_id = %task.id, error = %err, "candidate vanished before acquire");
                    report.vanished += 1;
                }
                Err(err) => return Err(err),
            }
        }
        if report.leased > 0 {
            debug!(scheduler_id = %self.id, leased = report.leased, "tasks dispatched");
        }
        Ok(report)
    }

    /// Run one leased attempt to completion, renewing the lease meanwhile.
    async fn dispatch(self: Arc<Self>, task: TaskRecord, grant: LeaseGrant) {
        let task_id = task.id;
        let Some(report) = self.execute_leased(&task, &grant).await else {
            return;
        };
        if let Some(err) = report.error(task_id) {
            info!(instance_id = %grant.instance_id, error = %err, "attempt failed");
        }

        let completion = Completion {
            task_id,
            scheduler_id: self.id,
            instance_id: grant.instance_id,
            report,
        };
        match self.leases.release(completion).await {
            Ok(transition) => {
                if let Err(err) = self.orchestrator.on_task_released(&transition).await {
                    warn!(task_id = %task_id, error = %err, "post-release bookkeeping failed");
                }
            }
            Err(SpiderError::LeaseLost { .. }) => {
                warn!(task_id = %task_id, "lease lost before release, result discarded");
            }
            Err(err) => error!(task_id = %task_id, error = %err, "release failed"),
        }
    }

    /// `None` when the lease was lost and the attempt must be abandoned.
    async fn execute_leased(&self, task: &TaskRecord, grant: &LeaseGrant) -> Option<TaskReport> {
        let inputs = match self.store.resolve_inputs(task.id).await {
            Ok(inputs) => inputs,
            Err(err) => return Some(TaskReport::failure(format!("resolving inputs: {err}"))),
        };
        let assignment = Assignment {
            task_id: task.id,
            job_id: task.job_id,
            instance_id: grant.instance_id,
            func_name: task.func_name.clone(),
            language: task.language,
            inputs,
        };

        let limit = task.timeout.and_then(|s| Duration::try_from_secs_f32(s).ok());
        let executor = Arc::clone(&self.executor);
        let work = async move {
            let run = executor.execute(assignment);
            let result = match limit {
                Some(limit) => match tokio::time::timeout(limit, run).await {
                    Ok(result) => result,
                    Err(_) => {
                        return TaskReport::TimedOut {
                            seconds: limit.as_secs_f64(),
                        };
                    }
                },
                None => run.await,
            };
            match result {
                Ok(outputs) => TaskReport::success(outputs),
                Err(message) => TaskReport::failure(message),
            }
        };
        tokio::pin!(work);

        let mut renew = tokio::time::interval(self.config.renew_interval());
        renew.tick().await;
        loop {
            tokio::select! {
                report = &mut work => return Some(report),
                _ = renew.tick() => match self.leases.renew(task.id, self.id).await {
                    Ok(RenewStatus::Renewed(_)) => {}
                    Ok(RenewStatus::CancelRequested) => {
                        info!(task_id = %task.id, "task cancelled while running");
                        return Some(TaskReport::failure("cancelled"));
                    }
                    Err(SpiderError::LeaseLost { .. }) => {
                        warn!(task_id = %task.id, "lease lost while running, abandoning attempt");
                        return None;
                    }
                    Err(err) => warn!(task_id = %task.id, error = %err, "lease renew failed"),
                },
            }
        }
    }
}
