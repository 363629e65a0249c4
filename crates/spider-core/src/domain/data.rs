//! Content-addressed data blobs.

use serde::{Deserialize, Serialize};

use super::ids::DataId;

/// A blob in the data store.
///
/// `hard_locality` pins the blob to the addresses in `locality`: a task that
/// reads it can only be leased by a scheduler at one of those addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    pub id: DataId,
    pub value: Vec<u8>,
    pub hard_locality: bool,
    pub persisted: bool,
    pub locality: Vec<String>,
}

impl DataRecord {
    pub fn new(value: Vec<u8>, hard_locality: bool) -> Self {
        Self {
            id: DataId::for_content(&value),
            value,
            hard_locality,
            persisted: false,
            locality: Vec::new(),
        }
    }

    /// Whether a scheduler at `address` may read this blob.
    pub fn reachable_from(&self, address: &str) -> bool {
        !self.hard_locality || self.locality.iter().any(|a| a == address)
    }
}
