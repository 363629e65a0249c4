//! ReaperLoop - Lease 期限切れの回収
//!
//! # フロー
//! 1. TaskStore::expired_leases() で期限切れを取得
//! 2. reclaim: running → ready（retry 予算を使い切っていれば fail）
//! 3. JobOrchestrator に渡して cascade / job 状態を更新

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::app::lease_manager::LeaseManager;
use crate::app::orchestrator::JobOrchestrator;
use crate::domain::Result;

pub struct ReaperLoop {
    leases: Arc<LeaseManager>,
    orchestrator: Arc<JobOrchestrator>,
}

impl ReaperLoop {
    pub fn new(leases: Arc<LeaseManager>, orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            leases,
            orchestrator,
        }
    }

    /// One pass. Returns how many tasks were reclaimed.
    pub async fn run_once(&self) -> Result<usize> {
        let reclaimed = self.leases.reclaim_expired().await?;
        for transition in &reclaimed {
            match self.orchestrator.on_task_released(transition).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    debug!(job_id = %transition.job_id, "job deleted after reclaim");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(reclaimed.len())
    }

    /// Run passes every `interval` until `shutdown` flips to true.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            if let Err(err) = self.run_once().await {
                warn!(error = %err, "reaper pass failed");
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    // sender dropped counts as shutdown
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
