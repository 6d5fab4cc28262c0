use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::{AllocationStore, Conflict, FieldFilter, SharedSlotState, SlotState, StoreError};

/// Process-local store. Each slot is guarded by its own lock; the id index
/// makes id uniqueness global.
///
/// Lock order is always slot lock, then an `ids` shard, never the reverse.
pub struct InMemoryStore {
    slots: DashMap<Slot, SharedSlotState>,
    /// Reverse lookup: reservation id → slot
    ids: DashMap<Ulid, Slot>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            ids: DashMap::new(),
        }
    }

    /// Rebuild state from a replayed log. No locking: nothing else can see it yet.
    pub(super) fn from_events(events: &[Event]) -> Self {
        let mut slots: HashMap<Slot, SlotState> = HashMap::new();
        for event in events {
            let slot = event.slot();
            slots
                .entry(slot)
                .or_insert_with(|| SlotState::new(slot))
                .apply(event);
        }

        let store = Self::new();
        for (slot, state) in slots {
            for record in state.records() {
                store.ids.insert(record.id, slot);
            }
            store.slots.insert(slot, Arc::new(RwLock::new(state)));
        }
        store
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Get or lazily create the state for a slot.
    pub(super) fn slot_state(&self, slot: Slot) -> SharedSlotState {
        self.slots
            .entry(slot)
            .or_insert_with(|| Arc::new(RwLock::new(SlotState::new(slot))))
            .value()
            .clone()
    }

    fn existing_slot(&self, slot: Slot) -> Option<SharedSlotState> {
        self.slots.get(&slot).map(|e| e.value().clone())
    }

    fn slot_states(&self) -> Vec<SharedSlotState> {
        self.slots.iter().map(|e| e.value().clone()).collect()
    }

    /// Both halves of the insert condition. On success the id is claimed, so
    /// the caller must either `apply` or `release_id`. Caller holds the slot
    /// write lock.
    pub(super) fn claim(
        &self,
        state: &SlotState,
        record: &AllocationRecord,
    ) -> Result<(), Conflict> {
        state.check_vacant(record)?;
        match self.ids.entry(record.id) {
            Entry::Occupied(_) => Err(Conflict::DuplicateId(record.id)),
            Entry::Vacant(e) => {
                e.insert(record.slot);
                Ok(())
            }
        }
    }

    pub(super) fn release_id(&self, id: &Ulid) {
        self.ids.remove(id);
    }

    /// Apply an event to slot state and keep the id index in step.
    pub(super) fn apply(&self, state: &mut SlotState, event: &Event) {
        state.apply(event);
        match event {
            Event::AllocationCommitted { record } => {
                self.ids.insert(record.id, record.slot);
            }
            Event::AllocationCancelled { id, .. } => {
                self.ids.remove(id);
            }
        }
    }

    /// Whether `record` is still the live holder of its key.
    pub(super) fn is_live(state: &SlotState, record: &AllocationRecord) -> bool {
        state
            .get(&record.resource_id)
            .is_some_and(|r| r.id == record.id)
    }

    async fn find_by_id(&self, id: &Ulid) -> Option<AllocationRecord> {
        let slot = self.ids.get(id).map(|e| *e.value())?;
        let shared = self.existing_slot(slot)?;
        let guard = shared.read().await;
        guard.find(id).cloned()
    }
}

#[async_trait]
impl AllocationStore for InMemoryStore {
    async fn query_by_slot(&self, slot: Slot) -> Result<Vec<AllocationRecord>, StoreError> {
        let Some(shared) = self.existing_slot(slot) else {
            return Ok(Vec::new());
        };
        let guard = shared.read().await;
        Ok(guard.records().cloned().collect())
    }

    async fn scan_all(&self) -> Result<Vec<AllocationRecord>, StoreError> {
        let mut all = Vec::with_capacity(self.len());
        for shared in self.slot_states() {
            let guard = shared.read().await;
            all.extend(guard.records().cloned());
        }
        all.sort_by(|a, b| (a.slot, &a.resource_id).cmp(&(b.slot, &b.resource_id)));
        Ok(all)
    }

    async fn scan_by_field(
        &self,
        filter: &FieldFilter,
    ) -> Result<Vec<AllocationRecord>, StoreError> {
        match filter {
            FieldFilter::Id(id) => Ok(self.find_by_id(id).await.into_iter().collect()),
            FieldFilter::Slot(slot) => self.query_by_slot(*slot).await,
            other => {
                let mut hits = self.scan_all().await?;
                hits.retain(|r| other.matches(r));
                Ok(hits)
            }
        }
    }

    async fn conditional_insert(&self, record: &AllocationRecord) -> Result<(), StoreError> {
        let shared = self.slot_state(record.slot);
        let mut guard = shared.write().await;
        self.claim(&guard, record)?;
        let event = Event::AllocationCommitted {
            record: record.clone(),
        };
        self.apply(&mut guard, &event);
        Ok(())
    }

    async fn delete(&self, record: &AllocationRecord) -> Result<bool, StoreError> {
        let Some(shared) = self.existing_slot(record.slot) else {
            return Ok(false);
        };
        let mut guard = shared.write().await;
        if !Self::is_live(&guard, record) {
            return Ok(false);
        }
        let event = Event::AllocationCancelled {
            id: record.id,
            slot: record.slot,
            resource_id: record.resource_id.clone(),
        };
        self.apply(&mut guard, &event);
        Ok(true)
    }
}
