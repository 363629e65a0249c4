//! Domain identifiers (strongly-typed IDs).
//!
//! Every row in the store is keyed by a 128-bit ULID. `Id<T>` wraps the ULID
//! with a phantom marker so a `JobId` can never be passed where a `TaskId` is
//! expected, while the in-memory size stays exactly 16 bytes (the width of the
//! `BINARY(16)` key columns).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for id kinds. The prefix is used by `Display`.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic identifier.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh id from the system clock and thread rng.
    ///
    /// Services should prefer an [`IdGenerator`](crate::ports::IdGenerator) so
    /// tests can pin the timestamp part.
    pub fn random() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self::from_ulid(Ulid::from_bytes(bytes))
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Big-endian bytes, as stored in a `BINARY(16)` column.
    pub fn to_bytes(&self) -> [u8; 16] {
        self.ulid.to_bytes()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

macro_rules! id_marker {
    ($(#[$doc:meta])* $marker:ident, $alias:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $marker {}

        impl IdMarker for $marker {
            fn prefix() -> &'static str {
                $prefix
            }
        }

        $(#[$doc])*
        pub type $alias = Id<$marker>;
    };
}

id_marker!(
    /// Identifier of a submitting client (also the owner of client KV rows).
    Driver, DriverId, "driver-"
);
id_marker!(
    /// Identifier of a scheduler process.
    Scheduler, SchedulerId, "scheduler-"
);
id_marker!(
    /// Identifier of a Job (submission / cancellation / status unit).
    Job, JobId, "job-"
);
id_marker!(
    /// Identifier of a Task. Stable across retries.
    Task, TaskId, "task-"
);
id_marker!(
    /// Identifier of one attempt (TaskInstance) of a task.
    Instance, InstanceId, "instance-"
);
id_marker!(
    /// Content-addressed identifier of a Data blob.
    Data, DataId, "data-"
);

impl DataId {
    /// Content address of `value`: the leading 16 bytes of its blake3 digest.
    pub fn for_content(value: &[u8]) -> Self {
        let digest = blake3::hash(value);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Self::from_bytes(bytes)
    }
}
