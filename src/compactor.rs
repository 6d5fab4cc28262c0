use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::store::{StoreError, WalStore};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once it has grown by
/// `threshold` appends since the last compaction.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&store, threshold).await {
            error!("WAL compaction failed: {e}");
        }
    }
}

/// One compactor check. Returns whether a compaction ran.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await;
    if appends < threshold.max(1) {
        debug!("compactor: {appends}/{threshold} appends, skipping");
        return Ok(false);
    }
    store.compact().await?;
    Ok(true)
}
