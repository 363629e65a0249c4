//! Driver and scheduler registrations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DriverId, SchedulerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub id: DriverId,
    pub heartbeat: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerRecord {
    pub id: SchedulerId,
    /// Host address, compared against data locality.
    pub address: String,
    pub port: u16,
    pub heartbeat: DateTime<Utc>,
}

impl SchedulerRecord {
    pub fn new(id: SchedulerId, address: impl Into<String>, port: u16, now: DateTime<Utc>) -> Self {
        Self {
            id,
            address: address.into(),
            port,
            heartbeat: now,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.heartbeat > timeout
    }
}
