//! Maintenance passes that repair bookkeeping drift.
//!
//! None of these run on the request path. Each one is safe to repeat: a
//! second run over a repaired store finds nothing to do.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::DedupConfig;
use crate::error::{AppError, Result};
use crate::events::{DedupEvent, EventSink};
use crate::hasher::{hash_reader, ContentHash};
use crate::models::{FileKind, FileRecord};
use crate::repository::{FileRepository, ReferenceAudit};
use crate::services::InflightUploads;
use crate::storage::BlobStore;

/// Originals that claim the same content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashCollision {
    pub content_hash: ContentHash,
    /// Earliest uploaded; survives a merge.
    pub canonical_id: String,
    pub others: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecheckReport {
    pub rehashed: u64,
    pub unreadable: u64,
    pub collisions: Vec<HashCollision>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub canonical_id: String,
    pub merged: Vec<String>,
    pub moved_dependents: u64,
    pub reference_count: i64,
}

pub struct Reconciler {
    repo: Arc<dyn FileRepository>,
    storage: Arc<dyn BlobStore>,
    events: Arc<dyn EventSink>,
    config: DedupConfig,
    inflight: Arc<InflightUploads>,
}

impl Reconciler {
    pub fn new(
        repo: Arc<dyn FileRepository>,
        storage: Arc<dyn BlobStore>,
        events: Arc<dyn EventSink>,
        config: DedupConfig,
        inflight: Arc<InflightUploads>,
    ) -> Self {
        Self {
            repo,
            storage,
            events,
            config,
            inflight,
        }
    }

    /// Fill in missing digests, then report originals sharing a digest.
    pub async fn recheck_all(&self) -> Result<RecheckReport> {
        let mut report = RecheckReport::default();
        let mut groups: BTreeMap<ContentHash, Vec<FileRecord>> = BTreeMap::new();

        for record in self.repo.missing_hash().await? {
            let hash = match self.digest_for(&record).await {
                Ok(hash) => hash,
                Err(e) => {
                    report.unreadable += 1;
                    self.events.emit(DedupEvent::BlobUnreadable {
                        record_id: record.id.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match self.repo.set_content_hash(&record.id, &hash).await {
                Ok(()) => report.rehashed += 1,
                Err(AppError::DuplicateRaceLost(_)) => {
                    // Another original already holds this digest.
                    if let Some(holder) = self.repo.find_original_by_hash(&hash).await? {
                        let group = groups.entry(hash).or_default();
                        group.push(holder);
                        group.push(record);
                    }
                }
                Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        for (hash, members) in self.repo.hash_collisions().await? {
            groups.entry(hash).or_default().extend(members);
        }

        for (content_hash, mut members) in groups {
            members.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then_with(|| a.id.cmp(&b.id)));
            members.dedup_by(|a, b| a.id == b.id);
            let mut ids = members.into_iter().map(|r| r.id);
            let Some(canonical_id) = ids.next() else {
                continue;
            };
            let others: Vec<String> = ids.collect();
            if others.is_empty() {
                continue;
            }

            let mut record_ids = vec![canonical_id.clone()];
            record_ids.extend(others.iter().cloned());
            self.events.emit(DedupEvent::HashCollision {
                content_hash: content_hash.clone(),
                record_ids,
            });
            report.collisions.push(HashCollision {
                content_hash,
                canonical_id,
                others,
            });
        }

        tracing::info!(
            rehashed = report.rehashed,
            unreadable = report.unreadable,
            collisions = report.collisions.len(),
            "Recheck complete"
        );
        Ok(report)
    }

    async fn digest_for(&self, record: &FileRecord) -> Result<ContentHash> {
        if let FileKind::Duplicate { ref original_id } = record.kind {
            if let Some(hash) = self
                .repo
                .get(original_id)
                .await?
                .and_then(|original| original.content_hash)
            {
                return Ok(hash);
            }
        }

        let hashed = tokio::time::timeout(self.config.io_timeout(), async {
            let reader = self.storage.open_read(&record.storage_path).await?;
            hash_reader(reader, self.config.chunk_size).await
        })
        .await
        .map_err(|_| {
            AppError::HashComputationFailed(format!(
                "reading {} timed out after {}s",
                record.storage_path, self.config.io_timeout_secs
            ))
        })??;

        Ok(hashed.0)
    }

    /// Fold every other original of a collision into the canonical one.
    ///
    /// Rows commit first; superseded blobs are removed afterwards, so a
    /// failure in between leaves orphans for [`Self::sweep_orphans`].
    pub async fn merge_collision(&self, collision: &HashCollision) -> Result<MergeReport> {
        let canonical = self
            .repo
            .get(&collision.canonical_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", collision.canonical_id)))?;

        let mut report = MergeReport {
            canonical_id: canonical.id.clone(),
            merged: Vec::new(),
            moved_dependents: 0,
            reference_count: canonical.reference_count().unwrap_or(1),
        };

        for other in &collision.others {
            let merged = self
                .repo
                .merge_into(&canonical.id, other, &collision.content_hash)
                .await?;
            report.merged.push(other.clone());
            report.moved_dependents += merged.moved_dependents;
            report.reference_count = merged.reference_count;

            if merged.superseded_path != canonical.storage_path {
                self.remove_blob(&merged.superseded_path).await;
            }
        }

        tracing::info!(
            canonical_id = %report.canonical_id,
            merged = report.merged.len(),
            reference_count = report.reference_count,
            "Merged colliding originals"
        );
        Ok(report)
    }

    /// Overwrite every drifted count with `1 + duplicate rows`.
    pub async fn recompute_reference_counts(&self) -> Result<Vec<ReferenceAudit>> {
        let mut repaired = Vec::new();

        for audit in self.repo.reference_drift().await? {
            let actual = match self.repo.recount_references(&audit.id).await {
                Ok(actual) => actual,
                Err(AppError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            self.events.emit(DedupEvent::ReferenceCountRepaired {
                record_id: audit.id.clone(),
                stored: audit.stored,
                actual,
            });
            repaired.push(ReferenceAudit {
                id: audit.id,
                stored: audit.stored,
                actual,
            });
        }

        Ok(repaired)
    }

    /// Delete blobs under the upload prefix that no record points at.
    pub async fn sweep_orphans(&self) -> Result<Vec<String>> {
        // Listing first: anything written after this is not a candidate.
        let blobs = self.storage.list(&self.config.upload_prefix).await?;
        let inflight = self.inflight.snapshot();
        let referenced = self.repo.storage_paths().await?;

        let mut swept = Vec::new();
        for path in blobs {
            if referenced.contains(&path) || inflight.contains(&path) {
                continue;
            }
            if self.remove_blob(&path).await {
                self.events.emit(DedupEvent::OrphanSwept { path: path.clone() });
                swept.push(path);
            }
        }

        Ok(swept)
    }

    async fn remove_blob(&self, path: &str) -> bool {
        let deleted =
            tokio::time::timeout(self.config.io_timeout(), self.storage.delete(path)).await;
        match deleted {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                self.events.emit(DedupEvent::BlobDeleteFailed {
                    path: path.to_string(),
                    reason: e.to_string(),
                });
                false
            }
            Err(_) => {
                self.events.emit(DedupEvent::BlobDeleteFailed {
                    path: path.to_string(),
                    reason: format!("timed out after {}s", self.config.io_timeout_secs),
                });
                false
            }
        }
    }
}
