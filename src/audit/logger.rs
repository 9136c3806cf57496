//! Non-blocking audit logger.
//!
//! `log()` enqueues and returns immediately; a single background task drains
//! the queue into [`AuditStore`]. Generalises the teacher's
//! `middleware::audit::log_async` fire-and-forget `tokio::spawn`-per-record
//! pattern into one bounded queue with an explicit consumer, so tests can
//! drain deterministically instead of racing a fresh spawned task per call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::store::AuditStore;
use super::AuditRecord;

const QUEUE_CAPACITY: usize = 1024;

pub struct AuditLogger {
    sender: mpsc::Sender<AuditRecord>,
    pending: Arc<AtomicU64>,
}

impl AuditLogger {
    /// Spawns the background consumer task and returns the logger handle.
    pub fn spawn(store: Arc<AuditStore>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<AuditRecord>(QUEUE_CAPACITY);
        let pending = Arc::new(AtomicU64::new(0));
        let worker_pending = pending.clone();

        tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                if let Err(err) = store.insert(&record).await {
                    tracing::error!("failed to persist audit record {}: {}", record.id, err);
                }
                worker_pending.fetch_sub(1, Ordering::SeqCst);
            }
        });

        Self { sender, pending }
    }

    /// Enqueue `record` for persistence. Returns before the write completes;
    /// a full queue drops the oldest write opportunity by logging and
    /// discarding the record rather than blocking the request path.
    pub fn log(&self, record: AuditRecord) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.sender.try_send(record) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("audit queue full, dropping record: {}", err);
        }
    }

    /// Synchronous drain: polls until every enqueued record has been
    /// written (or attempted). Production code never needs this; it exists
    /// for integration tests asserting on persisted state.
    pub async fn flush(&self) {
        while self.pending.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
}
