//! Decision model: what happens to a running task whose attempt did not succeed.
//!
//! Deciders are pure functions: given the task row and the cause they return
//! the next action. Applying it (and persisting it) is the store's job.

use std::fmt;

use super::task::TaskRecord;

/// Why the current attempt ended without success.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    /// The worker reported an error.
    Reported(String),
    /// The coordinator's timer for `Task.timeout` fired.
    TimedOut { seconds: f64 },
    /// The lease expired and another scheduler reclaimed it.
    LeaseExpired,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Reported(message) => write!(f, "worker error: {message}"),
            FailureCause::TimedOut { seconds } => write!(f, "timed out after {seconds}s"),
            FailureCause::LeaseExpired => f.write_str("lease expired"),
        }
    }
}

/// The next action for the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Back to `ready` and charge one unit of the retry budget.
    Retry { retry: u32, reason: String },

    /// Back to `ready` without touching the budget.
    Requeue { reason: String },

    /// Terminal `fail`.
    MarkFailed { reason: String },
}

pub trait Decider: Send + Sync {
    fn decide(&self, task: &TaskRecord, cause: &FailureCause) -> Decision;
}

/// Budget-based decider.
///
/// - Retry while `retry < max_retry`, otherwise mark failed.
/// - Lease expiry requeues for free unless `charge_lease_expiry` is set.
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider {
    charge_lease_expiry: bool,
}

impl DefaultDecider {
    pub fn new(charge_lease_expiry: bool) -> Self {
        Self {
            charge_lease_expiry,
        }
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task: &TaskRecord, cause: &FailureCause) -> Decision {
        if *cause == FailureCause::LeaseExpired && !self.charge_lease_expiry {
            return Decision::Requeue {
                reason: cause.to_string(),
            };
        }
        if task.retry < task.max_retry {
            Decision::Retry {
                retry: task.retry + 1,
                reason: format!("{cause}; retry {}/{}", task.retry + 1, task.max_retry),
            }
        } else {
            Decision::MarkFailed {
                reason: format!("{cause}; retry budget {} exhausted", task.max_retry),
            }
        }
    }
}
