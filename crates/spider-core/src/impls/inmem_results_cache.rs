//! In-memory ResultsCache.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::Result;
use crate::ports::{IndexSpec, ResultsCache};

#[derive(Default)]
struct CacheState {
    replica_set: bool,
    indexes: HashMap<String, Vec<String>>,
}

/// Records replica-set initiation and index creation.
#[derive(Default)]
pub struct InMemoryResultsCache {
    state: Mutex<CacheState>,
}

impl InMemoryResultsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_replica_set(&self) -> bool {
        self.state.lock().await.replica_set
    }
}

#[async_trait]
impl ResultsCache for InMemoryResultsCache {
    async fn ensure_replica_set(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        let initiated = !state.replica_set;
        state.replica_set = true;
        Ok(initiated)
    }

    async fn index_names(&self, collection: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state.indexes.get(collection).cloned().unwrap_or_default())
    }

    async fn create_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()> {
        let mut state = self.state.lock().await;
        let names = state.indexes.entry(collection.to_owned()).or_default();
        for index in indexes {
            let name = index.name();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(())
    }
}
