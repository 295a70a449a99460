//! Bookkeeping signals raised by the dedup services.
//!
//! Services never log through a global: they hold an `Arc<dyn EventSink>`
//! handed to them at construction. Production wires [`TracingSink`].

use std::sync::Mutex;

use crate::error::AppError;
use crate::hasher::ContentHash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupEvent {
    /// A new upload was stored as a duplicate of an existing original.
    Deduplicated {
        record_id: String,
        original_id: String,
        bytes_saved: u64,
    },
    /// An original insert hit the uniqueness constraint and will be retried.
    RaceLost { content_hash: ContentHash, attempt: u32 },
    /// A duplicate was removed while its original already had a zero count.
    ReferenceUnderflow { original_id: String, duplicate_id: String },
    /// Removing bytes from the blob store failed or found nothing there.
    BlobDeleteFailed { path: String, reason: String },
    /// An original still has dependents, so its bytes and row were kept.
    DeleteRefused { record_id: String, dependents: u64 },
    /// Two originals claim the same content.
    HashCollision { content_hash: ContentHash, record_ids: Vec<String> },
    /// A stored reference count disagreed with the duplicate rows.
    ReferenceCountRepaired { record_id: String, stored: i64, actual: i64 },
    /// A blob could not be read while rehashing.
    BlobUnreadable { record_id: String, reason: String },
    /// A blob with no record pointing at it was removed.
    OrphanSwept { path: String },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: DedupEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DedupEvent) {
        match event {
            DedupEvent::Deduplicated {
                record_id,
                original_id,
                bytes_saved,
            } => tracing::info!(%record_id, %original_id, bytes_saved, "Deduplicated upload"),
            DedupEvent::RaceLost {
                content_hash,
                attempt,
            } => tracing::debug!(%content_hash, attempt, "Lost original race, retrying as duplicate"),
            DedupEvent::ReferenceUnderflow {
                original_id,
                duplicate_id,
            } => tracing::warn!(
                %duplicate_id,
                "{}; clamped to zero, run reference count recompute",
                AppError::ReferenceUnderflow(original_id)
            ),
            DedupEvent::BlobDeleteFailed { path, reason } => {
                tracing::error!(%path, %reason, "Error deleting blob, left for reconciliation")
            }
            DedupEvent::DeleteRefused {
                record_id,
                dependents,
            } => tracing::warn!(%record_id, dependents, "Original has duplicates, can't delete physical file"),
            DedupEvent::HashCollision {
                content_hash,
                record_ids,
            } => tracing::warn!(%content_hash, ?record_ids, "Multiple originals share one content hash"),
            DedupEvent::ReferenceCountRepaired {
                record_id,
                stored,
                actual,
            } => tracing::info!(%record_id, stored, actual, "Repaired reference count"),
            DedupEvent::BlobUnreadable { record_id, reason } => {
                tracing::error!(%record_id, %reason, "Unable to read blob for rehash")
            }
            DedupEvent::OrphanSwept { path } => tracing::info!(%path, "Deleted orphaned blob"),
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DedupEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DedupEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: DedupEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
