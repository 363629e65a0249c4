//! Domain model: ids, lifecycle states, rows, specs and decisions.
//!
//! Nothing in here performs I/O. The store applies these types and state
//! machines inside its own critical sections.

pub mod data;
pub mod decision;
pub mod errors;
pub mod graph;
pub mod ids;
pub mod io;
pub mod job;
pub mod lease;
pub mod node;
pub mod outcome;
pub mod spec;
pub mod state;
pub mod task;

pub use data::DataRecord;
pub use decision::{Decider, Decision, DefaultDecider, FailureCause};
pub use errors::{ErrorKind, Result, SpiderError};
pub use graph::DependencyGraph;
pub use ids::{DataId, DriverId, Id, InstanceId, JobId, SchedulerId, TaskId};
pub use io::{InputSource, OutputValue, ResolvedInput, TaskInput, TaskOutput};
pub use job::{DeletionReport, JobRecord, JobStatus, TaskCounts};
pub use lease::{AcquireOutcome, DenyReason, Lease, LeaseGrant, RenewStatus};
pub use node::{DriverRecord, SchedulerRecord};
pub use outcome::{Completion, TaskReport};
pub use spec::{JobBuilder, JobPlan, JobSpec, TaskSpec};
pub use state::{JobState, Language, TaskState};
pub use task::{TaskInstance, TaskRecord, TaskTransition};
