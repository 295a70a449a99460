//! Durable file records.
//!
//! The repository is the only serialization point the dedup services rely
//! on: it enforces one original per content hash and applies every
//! reference-count change as an atomic update, never as read-modify-write
//! in application code.

pub mod sqlite;

pub use sqlite::SqliteFileRepository;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;

use crate::error::Result;
use crate::hasher::ContentHash;
use crate::models::{FileFilter, FileOrdering, FileRecord, StorageTotals};

/// Stored versus actual reference count of one original
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ReferenceAudit {
    pub id: String,
    pub stored: i64,
    pub actual: i64,
}

/// Result of folding one original into another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// Blob the folded record used to own
    pub superseded_path: String,
    /// Duplicates re-pointed from the folded record to the canonical one
    pub moved_dependents: u64,
    /// Canonical reference count after the merge
    pub reference_count: i64,
}

/// Result of trying to reserve an original for deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteClaim {
    /// No duplicate points at the original and new ones are refused until
    /// the row is gone.
    Claimed,
    /// Duplicates still point at the original; nothing changed.
    Referenced(u64),
    /// No such original.
    Missing,
}

#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Insert a new original.
    ///
    /// Fails with `DuplicateRaceLost` when an original with the same hash
    /// already exists.
    async fn insert_original(&self, record: &FileRecord) -> Result<()>;

    /// Insert a duplicate and bump its original's count in one transaction.
    ///
    /// Returns the original's new count, or `NotFound` if the original is
    /// gone or claimed for deletion.
    async fn insert_duplicate(&self, record: &FileRecord) -> Result<i64>;

    /// Earliest-uploaded original with this hash that is not claimed for deletion.
    async fn find_original_by_hash(&self, hash: &ContentHash) -> Result<Option<FileRecord>>;

    async fn get(&self, id: &str) -> Result<Option<FileRecord>>;

    async fn list(&self, filter: &FileFilter, ordering: FileOrdering) -> Result<Vec<FileRecord>>;

    /// Number of duplicates whose reference points at `id`.
    async fn count_duplicates_of(&self, id: &str) -> Result<u64>;

    /// Reserve an unreferenced original for deletion.
    ///
    /// The dependents check and the claim are one atomic step, so no
    /// duplicate can attach to a claimed original.
    async fn claim_for_delete(&self, id: &str) -> Result<DeleteClaim>;

    /// Remove a duplicate row and decrement its original, floored at zero.
    ///
    /// Returns `false` when there was nothing to decrement.
    async fn delete_duplicate(&self, id: &str, original_id: &str) -> Result<bool>;

    /// Remove an original row. Returns `false` if no such original exists.
    async fn delete_original(&self, id: &str) -> Result<bool>;

    /// Records stored without a digest, oldest first.
    async fn missing_hash(&self) -> Result<Vec<FileRecord>>;

    /// Fails with `DuplicateRaceLost` if another original already holds `hash`.
    async fn set_content_hash(&self, id: &str, hash: &ContentHash) -> Result<()>;

    /// Groups of originals sharing one hash, each group oldest first.
    async fn hash_collisions(&self) -> Result<Vec<(ContentHash, Vec<FileRecord>)>>;

    /// Turn original `loser_id` into a duplicate of `canonical_id`, moving
    /// its dependents along, and set both to `hash`.
    async fn merge_into(
        &self,
        canonical_id: &str,
        loser_id: &str,
        hash: &ContentHash,
    ) -> Result<MergeResult>;

    /// Originals whose stored count differs from `1 + duplicate rows`.
    async fn reference_drift(&self) -> Result<Vec<ReferenceAudit>>;

    /// Overwrite an original's count from its duplicate rows. Returns the new count.
    async fn recount_references(&self, id: &str) -> Result<i64>;

    async fn aggregate(&self, filter: &FileFilter) -> Result<StorageTotals>;

    /// Distinct content types, sorted.
    async fn content_types(&self) -> Result<Vec<String>>;

    /// Every blob path some record points at.
    async fn storage_paths(&self) -> Result<HashSet<String>>;
}
