use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::*;
use crate::store::{FieldFilter, StoreError};

use super::selection::{best_fit, validate_request};
use super::{Engine, EngineError};

impl Engine {
    /// Reserve the best-fitting free table for one party.
    ///
    /// Loop: read occupancy, pick the smallest table that fits, try a
    /// conditional insert. A conflict means someone else committed in
    /// between, so re-read and go again, up to `max_attempts`. Running out
    /// of tables is final on any attempt; running out of attempts is
    /// `Contention`. Only store faults come back as `Err`.
    pub async fn make_allocation(
        &self,
        request: AllocationRequest,
    ) -> Result<AllocationOutcome, EngineError> {
        let outcome = match validate_request(&request) {
            Ok(()) => self.allocate(request).await?,
            Err(reason) => AllocationOutcome::Failed(reason),
        };
        metrics::counter!(ALLOCATIONS_TOTAL, "outcome" => outcome.label()).increment(1);
        Ok(outcome)
    }

    async fn allocate(&self, request: AllocationRequest) -> Result<AllocationOutcome, EngineError> {
        let max_attempts = self.retry.max_attempts;
        for attempt in 1..=max_attempts {
            metrics::counter!(ALLOCATION_ATTEMPTS_TOTAL).increment(1);

            let free = self.free_resources_at_slot(request.slot).await?;
            let Some(table) = best_fit(&free, request.size) else {
                debug!(
                    "no free table for {} at slot {} ({} free)",
                    request.size,
                    request.slot,
                    free.len()
                );
                return Ok(AllocationOutcome::Failed(AllocationFailure::NoCapacity));
            };

            let record = AllocationRecord::new(request.slot, table.id.clone(), request.size);
            match self.store.conditional_insert(&record).await {
                Ok(()) => {
                    info!("committed {record} on attempt {attempt}");
                    return Ok(AllocationOutcome::Allocated(record));
                }
                Err(StoreError::Conflict(conflict)) => {
                    metrics::counter!(COMMIT_CONFLICTS_TOTAL).increment(1);
                    debug!("attempt {attempt}/{max_attempts} lost: {conflict}");
                    if attempt < max_attempts && !self.retry.backoff.is_zero() {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                }
                Err(e) => {
                    error!("store fault committing {record}: {e}");
                    return Err(e.into());
                }
            }
        }

        warn!(
            "giving up on party of {} at slot {} after {max_attempts} conflicting attempts",
            request.size, request.slot
        );
        Ok(AllocationOutcome::Failed(AllocationFailure::Contention))
    }

    /// Run each request through `make_allocation`, in order. Not atomic:
    /// earlier successes stay committed and later requests see them.
    pub async fn make_allocations(
        &self,
        requests: &[AllocationRequest],
    ) -> Result<BatchOutcome, EngineError> {
        let outcomes = self.allocate_in_order(requests).await?;
        let mut batch = BatchOutcome::default();
        for (&request, outcome) in requests.iter().zip(outcomes) {
            match outcome {
                AllocationOutcome::Allocated(record) => batch.succeeded.push(record),
                AllocationOutcome::Failed(reason) => {
                    batch.failed.push(FailedRequest { request, reason })
                }
            }
        }
        Ok(batch)
    }

    /// Same as `make_allocations`, but one outcome per request at the
    /// request's position.
    pub async fn allocate_in_order(
        &self,
        requests: &[AllocationRequest],
    ) -> Result<Vec<AllocationOutcome>, EngineError> {
        if requests.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut outcomes = Vec::with_capacity(requests.len());
        for &request in requests {
            outcomes.push(self.make_allocation(request).await?);
        }
        let reserved = outcomes.iter().filter(|o| o.record().is_some()).count();
        debug!(
            "batch of {}: {reserved} reserved, {} failed",
            requests.len(),
            requests.len() - reserved
        );
        Ok(outcomes)
    }

    /// Cancel by reservation id. `false` if it was not there (or a
    /// concurrent cancel removed it first).
    pub async fn cancel(&self, id: Ulid) -> Result<bool, EngineError> {
        let found = self
            .store
            .scan_by_field(&FieldFilter::Id(id))
            .await?
            .into_iter()
            .next();
        let removed = match found {
            Some(record) => self.store.delete(&record).await?,
            None => false,
        };
        if removed {
            info!("cancelled reservation {id}");
        } else {
            debug!("cancel: reservation {id} not found");
        }
        metrics::counter!(CANCELLATIONS_TOTAL, "found" => if removed { "true" } else { "false" })
            .increment(1);
        Ok(removed)
    }
}
