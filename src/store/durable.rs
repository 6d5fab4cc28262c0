use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info};

use crate::model::*;
use crate::wal::Wal;

use super::{AllocationStore, FieldFilter, InMemoryStore, StoreError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the log. Appends that queue up while one flush is in progress ride
/// the next flush together: block for the first append, drain whatever else
/// is already waiting, write all of it, fsync once, answer everyone.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Control commands see every append queued ahead of them.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
    debug!("WAL writer stopped");
}

/// All or nothing: when any entry fails, the whole batch is answered with
/// the error and none of it stays buffered or on disk.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    if let Err(e) = appended {
        wal.discard_unsynced();
        return Err(e);
    }
    wal.flush_sync()
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// [`InMemoryStore`] made durable by a write-ahead log.
///
/// A mutation holds its slot's write lock across the log append and the
/// in-memory apply, so a successful insert is both durable and visible
/// before the lock is released, and a failed append leaves no trace.
/// Compaction takes `gate` exclusively; mutations take it shared.
pub struct WalStore {
    inner: InMemoryStore,
    wal_tx: mpsc::Sender<WalCommand>,
    gate: RwLock<()>,
}

impl WalStore {
    /// Replay `path` and start the background writer. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let inner = InMemoryStore::from_events(&events);
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        info!(
            "replayed {} WAL entries, {} live reservations",
            events.len(),
            inner.len()
        );
        Ok(Self {
            inner,
            wal_tx,
            gate: RwLock::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Rewrite the log as one commit per live reservation.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _exclusive = self.gate.write().await;
        let events: Vec<Event> = self
            .inner
            .scan_all()
            .await?
            .into_iter()
            .map(|record| Event::AllocationCommitted { record })
            .collect();
        let live = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        info!("compacted WAL to {live} entries");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl AllocationStore for WalStore {
    async fn query_by_slot(&self, slot: Slot) -> Result<Vec<AllocationRecord>, StoreError> {
        self.inner.query_by_slot(slot).await
    }

    async fn scan_all(&self) -> Result<Vec<AllocationRecord>, StoreError> {
        self.inner.scan_all().await
    }

    async fn scan_by_field(
        &self,
        filter: &FieldFilter,
    ) -> Result<Vec<AllocationRecord>, StoreError> {
        self.inner.scan_by_field(filter).await
    }

    async fn conditional_insert(&self, record: &AllocationRecord) -> Result<(), StoreError> {
        let _shared = self.gate.read().await;
        let slot = self.inner.slot_state(record.slot);
        let mut guard = slot.write().await;
        self.inner.claim(&guard, record)?;

        let event = Event::AllocationCommitted {
            record: record.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.inner.release_id(&record.id);
            return Err(e);
        }
        self.inner.apply(&mut guard, &event);
        Ok(())
    }

    async fn delete(&self, record: &AllocationRecord) -> Result<bool, StoreError> {
        let _shared = self.gate.read().await;
        let slot = self.inner.slot_state(record.slot);
        let mut guard = slot.write().await;
        if !InMemoryStore::is_live(&guard, record) {
            return Ok(false);
        }

        let event = Event::AllocationCancelled {
            id: record.id,
            slot: record.slot,
            resource_id: record.resource_id.clone(),
        };
        self.wal_append(&event).await?;
        self.inner.apply(&mut guard, &event);
        Ok(true)
    }
}
