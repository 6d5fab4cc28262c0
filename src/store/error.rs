use ulid::Ulid;

use crate::model::Slot;

/// The condition a conditional insert found violated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Another record already holds the table at this slot.
    Occupied { slot: Slot, resource_id: String },
    /// A record with this id was already committed.
    DuplicateId(Ulid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Conflict(Conflict),
    Unavailable(String),
    Wal(String),
}

impl From<Conflict> for StoreError {
    fn from(c: Conflict) -> Self {
        StoreError::Conflict(c)
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::Occupied { slot, resource_id } => {
                write!(f, "table {resource_id} already reserved at slot {slot}")
            }
            Conflict::DuplicateId(id) => write!(f, "reservation {id} already exists"),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict(c) => write!(f, "conditional write failed: {c}"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
