use serde::Serialize;
use std::sync::Arc;

use crate::config::DedupConfig;
use crate::error::{AppError, Result};
use crate::events::{DedupEvent, EventSink};
use crate::models::{FileKind, FileRecord};
use crate::repository::{DeleteClaim, FileRepository};
use crate::storage::BlobStore;

/// What a delete request actually did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// Row removed, original's count decremented, no bytes touched.
    DuplicateRemoved { original_id: String },
    /// Bytes and row removed.
    OriginalRemoved { bytes_freed: u64 },
    /// Original still referenced; bytes and row kept.
    Retained { dependents: u64 },
}

/// Removes records without ever deleting bytes that are still referenced
pub struct DeletionCoordinator {
    repo: Arc<dyn FileRepository>,
    storage: Arc<dyn BlobStore>,
    events: Arc<dyn EventSink>,
    config: DedupConfig,
}

impl DeletionCoordinator {
    pub fn new(
        repo: Arc<dyn FileRepository>,
        storage: Arc<dyn BlobStore>,
        events: Arc<dyn EventSink>,
        config: DedupConfig,
    ) -> Self {
        Self {
            repo,
            storage,
            events,
            config,
        }
    }

    pub async fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        let record = self
            .repo
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        match record.kind {
            FileKind::Duplicate { ref original_id } => {
                self.delete_duplicate(&record, original_id).await
            }
            FileKind::Original { .. } => self.delete_original(&record).await,
        }
    }

    async fn delete_duplicate(&self, record: &FileRecord, original_id: &str) -> Result<DeleteOutcome> {
        let decremented = self.repo.delete_duplicate(&record.id, original_id).await?;
        if !decremented {
            self.events.emit(DedupEvent::ReferenceUnderflow {
                original_id: original_id.to_string(),
                duplicate_id: record.id.clone(),
            });
        }

        tracing::info!(id = %record.id, %original_id, "Deleted duplicate");
        Ok(DeleteOutcome::DuplicateRemoved {
            original_id: original_id.to_string(),
        })
    }

    /// Claim first, blob second, row last. Once claimed, no new duplicate
    /// can attach to the record. A crash after the claim leaves an orphaned
    /// blob or a claimed row, never a duplicate pointing at missing bytes.
    async fn delete_original(&self, record: &FileRecord) -> Result<DeleteOutcome> {
        match self.repo.claim_for_delete(&record.id).await? {
            DeleteClaim::Claimed => {}
            DeleteClaim::Referenced(dependents) => {
                self.events.emit(DedupEvent::DeleteRefused {
                    record_id: record.id.clone(),
                    dependents,
                });
                return Ok(DeleteOutcome::Retained { dependents });
            }
            DeleteClaim::Missing => {
                return Err(AppError::NotFound("File not found".to_string()))
            }
        }

        let deleted = tokio::time::timeout(
            self.config.io_timeout(),
            self.storage.delete(&record.storage_path),
        )
        .await;
        let failure = match deleted {
            Ok(Ok(true)) => None,
            Ok(Ok(false)) => Some("blob already missing".to_string()),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {}s", self.config.io_timeout_secs)),
        };
        if let Some(reason) = failure {
            self.events.emit(DedupEvent::BlobDeleteFailed {
                path: record.storage_path.clone(),
                reason,
            });
        }

        if !self.repo.delete_original(&record.id).await? {
            return Err(AppError::NotFound("File not found".to_string()));
        }

        tracing::info!(id = %record.id, path = %record.storage_path, "Deleted original and its blob");
        Ok(DeleteOutcome::OriginalRemoved {
            bytes_freed: record.actual_size(),
        })
    }
}
