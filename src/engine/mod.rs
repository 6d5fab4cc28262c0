mod error;
mod mutations;
mod queries;
mod selection;

pub use error::EngineError;
pub use selection::best_fit;

use std::sync::Arc;
use std::time::Duration;

use crate::catalog::Catalog;
use crate::limits::MAX_ATTEMPTS;
use crate::store::AllocationStore;

/// How hard `make_allocation` tries before reporting contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Commit attempts per request, including the first. At least 1.
    pub max_attempts: u32,
    /// Pause after a conflicting commit before re-querying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS),
            backoff,
        }
    }
}

/// Reservation allocator.
///
/// Holds no locks and no mutable state: every caller runs its own
/// query/select/commit loop and the store's conditional insert decides
/// races. Share it as `Arc<Engine>`.
pub struct Engine {
    catalog: Arc<Catalog>,
    store: Arc<dyn AllocationStore>,
    retry: RetryPolicy,
}

impl Engine {
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn AllocationStore>) -> Self {
        Self::with_retry(catalog, store, RetryPolicy::default())
    }

    pub fn with_retry(
        catalog: Arc<Catalog>,
        store: Arc<dyn AllocationStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            catalog,
            store,
            retry,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}
