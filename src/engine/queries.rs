use std::collections::HashSet;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Catalog tables with no reservation at `slot`, in catalog order.
    ///
    /// A snapshot only: a table returned here can be taken before the
    /// caller commits, which is why allocation retries.
    pub async fn free_resources_at_slot(&self, slot: Slot) -> Result<Vec<Resource>, EngineError> {
        let taken: HashSet<String> = self
            .store
            .query_by_slot(slot)
            .await?
            .into_iter()
            .map(|r| r.resource_id)
            .collect();
        Ok(self
            .catalog
            .resources()
            .iter()
            .filter(|r| !taken.contains(&r.id))
            .cloned()
            .collect())
    }

    /// Every live reservation, ordered by slot then table.
    pub async fn list_all_allocations(&self) -> Result<Vec<AllocationRecord>, EngineError> {
        Ok(self.store.scan_all().await?)
    }

    pub fn list_resources(&self) -> &[Resource] {
        self.catalog.resources()
    }
}
