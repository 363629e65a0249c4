//! Positional task inputs and outputs (the data-flow graph).

use serde::{Deserialize, Serialize};

use super::ids::{DataId, TaskId};

/// Where an input slot gets its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InputSource {
    /// Inline bytes supplied by the driver.
    Value(Vec<u8>),
    /// The output at `position` of another task of the same job.
    TaskOutput { task_id: TaskId, position: u32 },
    /// A blob in the data store.
    Data(DataId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInput {
    pub position: u32,
    pub type_name: String,
    pub source: InputSource,
}

/// A committed output value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OutputValue {
    Value(Vec<u8>),
    Data(DataId),
}

/// An output slot. `value` stays empty until the task succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub position: u32,
    pub type_name: String,
    pub value: Option<OutputValue>,
}

impl TaskOutput {
    pub fn declared(position: u32, type_name: impl Into<String>) -> Self {
        Self {
            position,
            type_name: type_name.into(),
            value: None,
        }
    }
}

/// An input slot with its value materialised for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInput {
    pub position: u32,
    pub type_name: String,
    pub value: Vec<u8>,
}
