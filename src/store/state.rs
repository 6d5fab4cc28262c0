use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::Conflict;

pub type SharedSlotState = Arc<RwLock<SlotState>>;

/// Everything committed at one slot, keyed by table id.
///
/// Slot is the partition key and table id the sort key, so "who holds what
/// at slot N" is a single read and a second holder for a table is
/// structurally impossible.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub slot: Slot,
    by_resource: BTreeMap<String, AllocationRecord>,
}

impl SlotState {
    pub fn new(slot: Slot) -> Self {
        Self {
            slot,
            by_resource: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_resource.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_resource.is_empty()
    }

    pub fn get(&self, resource_id: &str) -> Option<&AllocationRecord> {
        self.by_resource.get(resource_id)
    }

    /// Records ordered by table id.
    pub fn records(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.by_resource.values()
    }

    pub fn find(&self, id: &Ulid) -> Option<&AllocationRecord> {
        self.by_resource.values().find(|r| r.id == *id)
    }

    /// Key check half of a conditional insert.
    pub fn check_vacant(&self, record: &AllocationRecord) -> Result<(), Conflict> {
        if self.by_resource.contains_key(&record.resource_id) {
            return Err(Conflict::Occupied {
                slot: self.slot,
                resource_id: record.resource_id.clone(),
            });
        }
        Ok(())
    }

    /// Apply a log event. No checks: the caller already validated, or is replaying.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::AllocationCommitted { record } => {
                self.by_resource
                    .insert(record.resource_id.clone(), record.clone());
            }
            Event::AllocationCancelled { id, resource_id, .. } => {
                if self.by_resource.get(resource_id).is_some_and(|r| r.id == *id) {
                    self.by_resource.remove(resource_id);
                }
            }
        }
    }
}
