//! IdGenerator port.
//!
//! Ids are ULIDs whose timestamp part comes from the injected [`Clock`], so a
//! `FixedClock` yields ids with a deterministic time prefix.

use crate::domain::ids::{Id, IdMarker, InstanceId, JobId, TaskId};
use crate::ports::Clock;
use ulid::Ulid;

pub trait IdGenerator: Send + Sync {
    fn next_ulid(&self) -> Ulid;

    fn job_id(&self) -> JobId {
        Id::from_ulid(self.next_ulid())
    }

    fn task_id(&self) -> TaskId {
        Id::from_ulid(self.next_ulid())
    }

    fn instance_id(&self) -> InstanceId {
        Id::from_ulid(self.next_ulid())
    }
}

/// Generic helper for id kinds without a dedicated method.
pub fn next_id<T: IdMarker>(generator: &dyn IdGenerator) -> Id<T> {
    Id::from_ulid(generator.next_ulid())
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}
