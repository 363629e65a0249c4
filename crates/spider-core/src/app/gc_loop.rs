//! GcLoop - Data のガベージコレクション
//!
//! driver からも task からも参照されず、persisted でもない Data を削除する。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::domain::{DataId, Result};
use crate::ports::TaskStore;

pub struct GcLoop {
    store: Arc<dyn TaskStore>,
}

impl GcLoop {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub async fn run_once(&self) -> Result<Vec<DataId>> {
        self.store.collect_garbage().await
    }

    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            if let Err(err) = self.run_once().await {
                warn!(error = %err, "data gc pass failed");
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
