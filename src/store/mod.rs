//! Storage boundary for allocation records.
//!
//! The engine never locks anything itself. It leans entirely on
//! [`AllocationStore::conditional_insert`], which must check and write as one
//! atomic step:
//!
//! 1. the `(slot, resource_id)` key is not already held (the real
//!    double-booking guard, enforced by the key layout), and
//! 2. no record with the same generated `id` exists.
//!
//! A failed check surfaces as [`StoreError::Conflict`]; anything else is a
//! store fault.

mod durable;
mod error;
mod memory;
mod state;

pub use durable::WalStore;
pub use error::{Conflict, StoreError};
pub use memory::InMemoryStore;
pub use state::{SharedSlotState, SlotState};

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::{AllocationRecord, Slot};

#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Exact-match lookup on the slot, the store's primary grouping key.
    async fn query_by_slot(&self, slot: Slot) -> Result<Vec<AllocationRecord>, StoreError>;

    /// Every live record, ordered by `(slot, resource_id)`.
    async fn scan_all(&self) -> Result<Vec<AllocationRecord>, StoreError>;

    /// Records whose field equals the filter value.
    async fn scan_by_field(
        &self,
        filter: &FieldFilter,
    ) -> Result<Vec<AllocationRecord>, StoreError>;

    /// Insert only if both the key and the id are vacant.
    async fn conditional_insert(&self, record: &AllocationRecord) -> Result<(), StoreError>;

    /// Remove the record if it is still live. Returns whether anything was removed.
    async fn delete(&self, record: &AllocationRecord) -> Result<bool, StoreError>;
}

/// Field/value pair for [`AllocationStore::scan_by_field`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldFilter {
    Id(Ulid),
    Slot(Slot),
    ResourceId(String),
    Size(u32),
}

impl FieldFilter {
    pub fn matches(&self, record: &AllocationRecord) -> bool {
        match self {
            FieldFilter::Id(id) => record.id == *id,
            FieldFilter::Slot(slot) => record.slot == *slot,
            FieldFilter::ResourceId(rid) => record.resource_id == *rid,
            FieldFilter::Size(size) => record.size == *size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_single_field() {
        let record = AllocationRecord::new(4, "Banana", 2);
        assert!(FieldFilter::Id(record.id).matches(&record));
        assert!(!FieldFilter::Id(Ulid::new()).matches(&record));
        assert!(FieldFilter::Slot(4).matches(&record));
        assert!(!FieldFilter::Slot(5).matches(&record));
        assert!(FieldFilter::ResourceId("Banana".into()).matches(&record));
        assert!(!FieldFilter::ResourceId("banana".into()).matches(&record));
        assert!(FieldFilter::Size(2).matches(&record));
        assert!(!FieldFilter::Size(3).matches(&record));
    }
}
