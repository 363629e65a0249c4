//! Results-cache indexes for stream metadata.

use tracing::info;

use crate::domain::{Result, SpiderError};
use crate::ports::{IndexSpec, ResultsCache};

/// Indexes the stream collection needs.
pub fn stream_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::ascending(["file_split_id"]),
        IndexSpec::ascending(["orig_file_id", "begin_msg_ix", "end_msg_ix"]),
    ]
}

/// Initialise the replica set if needed, then create the missing stream
/// indexes. Returns the names of the indexes created; empty on a re-run.
pub async fn ensure_indexes(cache: &dyn ResultsCache, collection: &str) -> Result<Vec<String>> {
    if collection.trim().is_empty() {
        return Err(SpiderError::Validation(
            "stream collection name must not be empty".into(),
        ));
    }
    if cache.ensure_replica_set().await? {
        info!("results cache replica set initialised");
    }

    let existing = cache.index_names(collection).await?;
    let missing: Vec<IndexSpec> = stream_indexes()
        .into_iter()
        .filter(|index| !existing.contains(&index.name()))
        .collect();
    if missing.is_empty() {
        info!(collection, "results cache indexes already present");
        return Ok(Vec::new());
    }

    cache.create_indexes(collection, &missing).await?;
    let created: Vec<String> = missing.iter().map(IndexSpec::name).collect();
    info!(collection, indexes = ?created, "results cache indexes created");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryResultsCache;

    #[tokio::test]
    async fn creates_indexes_once() {
        let cache = InMemoryResultsCache::new();
        let created = ensure_indexes(&cache, "stream_files").await.unwrap();
        assert_eq!(
            created,
            vec![
                "file_split_id_1".to_string(),
                "orig_file_id_1_begin_msg_ix_1_end_msg_ix_1".to_string(),
            ]
        );
        assert!(cache.is_replica_set().await);
        assert!(ensure_indexes(&cache, "stream_files").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_collection_name_is_rejected() {
        let cache = InMemoryResultsCache::new();
        assert!(ensure_indexes(&cache, " ").await.is_err());
    }
}
