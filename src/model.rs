use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Discrete time unit a table is held for (one hour).
pub type Slot = u32;

/// An allocatable table with a fixed seat count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub capacity: u32,
}

impl Resource {
    pub fn new(id: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            capacity,
        }
    }

    pub fn fits(&self, size: u32) -> bool {
        self.capacity >= size
    }
}

/// A committed reservation. `(slot, resource_id)` is unique across live records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Generated by the engine per commit attempt.
    pub id: Ulid,
    pub slot: Slot,
    pub resource_id: String,
    /// Party size.
    pub size: u32,
}

impl AllocationRecord {
    pub fn new(slot: Slot, resource_id: impl Into<String>, size: u32) -> Self {
        Self {
            id: Ulid::new(),
            slot,
            resource_id: resource_id.into(),
            size,
        }
    }
}

impl fmt::Display for AllocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reservation {} (slot {}, table {}, {} seated)",
            self.id, self.slot, self.resource_id, self.size
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub slot: Slot,
    pub size: u32,
}

impl AllocationRequest {
    pub fn new(slot: Slot, size: u32) -> Self {
        Self { slot, size }
    }
}

/// Why a request did not produce a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationFailure {
    /// No free table at the slot seats the party. Never retried.
    NoCapacity,
    /// Every commit attempt lost to a concurrent writer.
    Contention,
    /// The request is outside the accepted limits.
    Rejected(&'static str),
}

impl AllocationFailure {
    pub fn label(&self) -> &'static str {
        match self {
            AllocationFailure::NoCapacity => "no_capacity",
            AllocationFailure::Contention => "contention",
            AllocationFailure::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for AllocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationFailure::NoCapacity => write!(f, "no free table large enough"),
            AllocationFailure::Contention => {
                write!(f, "gave up after repeated conflicting commits")
            }
            AllocationFailure::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    Allocated(AllocationRecord),
    Failed(AllocationFailure),
}

impl AllocationOutcome {
    pub fn record(&self) -> Option<&AllocationRecord> {
        match self {
            AllocationOutcome::Allocated(record) => Some(record),
            AllocationOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<AllocationFailure> {
        match self {
            AllocationOutcome::Allocated(_) => None,
            AllocationOutcome::Failed(reason) => Some(*reason),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AllocationOutcome::Allocated(_) => "reserved",
            AllocationOutcome::Failed(reason) => reason.label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedRequest {
    pub request: AllocationRequest,
    pub reason: AllocationFailure,
}

/// Result of a batch: every request lands in exactly one list, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: Vec<AllocationRecord>,
    pub failed: Vec<FailedRequest>,
}

impl BatchOutcome {
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Durable log record. Flat, one per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AllocationCommitted {
        record: AllocationRecord,
    },
    AllocationCancelled {
        id: Ulid,
        slot: Slot,
        resource_id: String,
    },
}

impl Event {
    pub fn slot(&self) -> Slot {
        match self {
            Event::AllocationCommitted { record } => record.slot,
            Event::AllocationCancelled { slot, .. } => *slot,
        }
    }
}
