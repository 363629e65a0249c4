//! Scheduler leases.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::{Result, SpiderError};
use super::ids::{InstanceId, SchedulerId, TaskId};
use super::state::TaskState;

/// "Scheduler currently owns this task's assignment."
///
/// Unique per `(scheduler_id, task_id)`; the store additionally keeps at most
/// one live lease per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub scheduler_id: SchedulerId,
    pub task_id: TaskId,
    pub lease_time: DateTime<Utc>,
}

impl Lease {
    /// Expired once strictly more than `ttl` has elapsed since `lease_time`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.lease_time > ttl
    }
}

/// A granted lease together with the attempt it opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseGrant {
    pub lease: Lease,
    pub instance_id: InstanceId,
}

/// Why an acquisition was refused. All of these are normal race outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Another scheduler holds an unexpired lease.
    Held { holder: SchedulerId },
    /// The task is not in `ready`.
    NotReady(TaskState),
    /// A hard-locality input is not reachable from the requesting scheduler.
    Locality { address: String },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Held { holder } => write!(f, "held by {holder}"),
            DenyReason::NotReady(state) => write!(f, "task is {state}"),
            DenyReason::Locality { address } => {
                write!(f, "hard-locality input not reachable from {address}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted(LeaseGrant),
    Denied(DenyReason),
}

impl AcquireOutcome {
    pub fn granted(self) -> Option<LeaseGrant> {
        match self {
            AcquireOutcome::Granted(grant) => Some(grant),
            AcquireOutcome::Denied(_) => None,
        }
    }

    /// The grant, or a `LeaseDenied` error for callers that treat a lost race
    /// as an error.
    pub fn into_grant(self, task_id: TaskId) -> Result<LeaseGrant> {
        match self {
            AcquireOutcome::Granted(grant) => Ok(grant),
            AcquireOutcome::Denied(reason) => Err(SpiderError::LeaseDenied {
                task_id,
                reason: reason.to_string(),
            }),
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, AcquireOutcome::Granted(_))
    }
}

/// Result of a successful renew.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewStatus {
    Renewed(Lease),
    /// The task was cancelled while running; the holder should stop and release.
    CancelRequested,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn expiry_is_strictly_after_ttl() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let lease = Lease {
            scheduler_id: SchedulerId::random(),
            task_id: TaskId::random(),
            lease_time: t0,
        };
        let ttl = Duration::seconds(30);
        assert!(!lease.is_expired(t0 + Duration::seconds(30), ttl));
        assert!(lease.is_expired(t0 + Duration::seconds(31), ttl));
    }

    #[test]
    fn denial_becomes_a_transient_error() {
        let task = TaskId::random();
        let holder = SchedulerId::random();
        let err = AcquireOutcome::Denied(DenyReason::Held { holder })
            .into_grant(task)
            .unwrap_err();
        assert!(matches!(&err, SpiderError::LeaseDenied { task_id, .. } if *task_id == task));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("held by"));
    }
}
