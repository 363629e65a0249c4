//! ResultsCache port - the document store holding cached stream results.

use async_trait::async_trait;

use crate::domain::Result;

/// A secondary index: ascending on every key, named `key_1[_key_1...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub keys: Vec<String>,
}

impl IndexSpec {
    pub fn ascending<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// The name the server assigns when none is given.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|k| format!("{k}_1"))
            .collect::<Vec<_>>()
            .join("_")
    }
}

#[async_trait]
pub trait ResultsCache: Send + Sync {
    /// Make sure the server is part of an initialised replica set.
    /// Returns true if this call initiated it.
    async fn ensure_replica_set(&self) -> Result<bool>;

    /// Index names on `collection`. A missing collection has none.
    async fn index_names(&self, collection: &str) -> Result<Vec<String>>;

    async fn create_indexes(&self, collection: &str, indexes: &[IndexSpec]) -> Result<()>;
}
