//! LeaseManager - Lease の取得・更新・解放・回収
//!
//! 排他制御は TaskStore の条件付き更新だけに依存する。Scheduler 同士は
//! 直接通信しない。

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};

use crate::app::resolver::DependencyResolver;
use crate::domain::{
    AcquireOutcome, Completion, Decider, RenewStatus, Result, SchedulerId, TaskId, TaskTransition,
};
use crate::ports::{AcquireRequest, Clock, IdGenerator, TaskStore};

pub struct LeaseManager {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    decider: Arc<dyn Decider>,
    resolver: DependencyResolver,
    ttl: Duration,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        decider: Arc<dyn Decider>,
        ttl: Duration,
    ) -> Self {
        Self {
            resolver: DependencyResolver::new(Arc::clone(&store)),
            store,
            clock,
            ids,
            decider,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try to lease `task` for `scheduler`.
    ///
    /// An expired lease left by another scheduler is reclaimed first, so a
    /// task orphaned by a crashed holder can be re-leased in one call. Denials
    /// are normal race outcomes, not errors.
    pub async fn acquire(&self, task: TaskId, scheduler: SchedulerId) -> Result<AcquireOutcome> {
        self.reclaim(task).await?;
        let request = AcquireRequest {
            task_id: task,
            scheduler_id: scheduler,
            instance_id: self.ids.instance_id(),
            now: self.clock.now(),
            ttl: self.ttl,
        };
        let outcome = self.store.try_acquire(request).await?;
        if let AcquireOutcome::Denied(reason) = &outcome {
            debug!(task_id = %task, scheduler_id = %scheduler, %reason, "lease denied");
        }
        Ok(outcome)
    }

    /// Extend the lease to now. `LeaseLost` if it was reclaimed meanwhile.
    pub async fn renew(&self, task: TaskId, scheduler: SchedulerId) -> Result<RenewStatus> {
        self.store.renew_lease(task, scheduler, self.clock.now()).await
    }

    /// Delete the lease and apply the attempt's outcome to the task.
    pub async fn release(&self, completion: Completion) -> Result<TaskTransition> {
        self.store.complete(completion, self.decider.as_ref()).await
    }

    /// Reclaim the lease of `task` if it expired. Cascades immediately when
    /// the reclaim exhausts the retry budget.
    pub async fn reclaim(&self, task: TaskId) -> Result<Option<TaskTransition>> {
        let transition = self
            .store
            .reclaim(task, self.clock.now(), self.ttl, self.decider.as_ref())
            .await?;
        if let Some(transition) = &transition
            && transition.needs_cascade()
        {
            self.resolver.cascade(transition.task_id).await?;
        }
        Ok(transition)
    }

    /// Reclaim every expired lease, whoever holds it.
    pub async fn reclaim_expired(&self) -> Result<Vec<TaskTransition>> {
        let expired = self.store.expired_leases(self.clock.now(), self.ttl).await?;
        let mut reclaimed = Vec::new();
        for lease in expired {
            if let Some(transition) = self.reclaim(lease.task_id).await? {
                reclaimed.push(transition);
            }
        }
        if !reclaimed.is_empty() {
            warn!(count = reclaimed.len(), "reclaimed expired leases");
        }
        Ok(reclaimed)
    }
}
