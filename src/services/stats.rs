use std::sync::Arc;

use crate::error::Result;
use crate::models::{FileFilter, StorageStats};
use crate::repository::FileRepository;

/// Storage accounting over record metadata
pub struct StatsService {
    repo: Arc<dyn FileRepository>,
}

impl StatsService {
    pub fn new(repo: Arc<dyn FileRepository>) -> Self {
        Self { repo }
    }

    /// Deduplication totals for every record matching `filter`.
    ///
    /// Blob contents are never read.
    pub async fn compute_stats(&self, filter: &FileFilter) -> Result<StorageStats> {
        let totals = self.repo.aggregate(filter).await?;
        Ok(StorageStats::from(totals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedupConfig;
    use crate::db::Database;
    use crate::events::MemorySink;
    use crate::models::{FileOrdering, NewUpload};
    use crate::repository::SqliteFileRepository;
    use crate::services::DedupEngine;
    use crate::storage::MemoryBlobStore;

    fn upload(name: &str, content_type: &str, size: u64) -> NewUpload {
        NewUpload {
            original_filename: name.to_string(),
            content_type: content_type.to_string(),
            declared_size: size,
        }
    }

    async fn setup() -> (DedupEngine, StatsService, Arc<SqliteFileRepository>) {
        let repo = Arc::new(SqliteFileRepository::new(Database::in_memory().await.unwrap()));
        let engine = DedupEngine::new(
            repo.clone(),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemorySink::new()),
            DedupConfig::default(),
        );
        (engine, StatsService::new(repo.clone()), repo)
    }

    #[tokio::test]
    async fn empty_store_reports_zeroes() {
        let (_, stats, _) = setup().await;
        let s = stats.compute_stats(&FileFilter::default()).await.unwrap();

        assert_eq!(s.total_files, 0);
        assert_eq!(s.storage_saved, 0);
        assert_eq!(s.storage_saved_percentage, 0.0);
        assert!(s.content_types.is_empty());
        assert_eq!(s.size_range.min, None);
    }

    #[tokio::test]
    async fn saved_bytes_equal_duplicate_sizes() {
        let (engine, stats, repo) = setup().await;
        engine.ingest(&b"aaaa"[..], upload("a.txt", "text/plain", 4)).await.unwrap();
        engine.ingest(&b"aaaa"[..], upload("b.txt", "text/plain", 4)).await.unwrap();
        engine.ingest(&b"aaaa"[..], upload("c.txt", "text/plain", 4)).await.unwrap();
        engine.ingest(&b"12345678"[..], upload("d.png", "image/png", 8)).await.unwrap();

        let s = stats.compute_stats(&FileFilter::default()).await.unwrap();
        assert_eq!(s.total_files, 4);
        assert_eq!(s.unique_files, 2);
        assert_eq!(s.duplicate_files, 2);
        assert_eq!(s.total_size, 20);
        assert_eq!(s.actual_size, 12);
        assert_eq!(s.storage_saved, 8);
        assert!((s.storage_saved_percentage - 40.0).abs() < 1e-9);
        assert_eq!(s.size_range.min, Some(4));
        assert_eq!(s.size_range.max, Some(8));
        assert_eq!(s.content_types[0].content_type, "text/plain");
        assert_eq!(s.content_types[0].count, 3);
        assert_eq!(s.content_types[0].total_size, 12);

        let duplicates = repo
            .list(
                &FileFilter {
                    is_duplicate: Some(true),
                    ..Default::default()
                },
                FileOrdering::default(),
            )
            .await
            .unwrap();
        let saved: u64 = duplicates.iter().map(|r| r.size).sum();
        assert_eq!(s.storage_saved, saved);
    }

    #[tokio::test]
    async fn filter_narrows_totals() {
        let (engine, stats, _) = setup().await;
        engine.ingest(&b"aaaa"[..], upload("a.txt", "text/plain", 4)).await.unwrap();
        engine.ingest(&b"12345678"[..], upload("d.png", "image/png", 8)).await.unwrap();

        let s = stats
            .compute_stats(&FileFilter {
                content_type: Some("image/png".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(s.total_files, 1);
        assert_eq!(s.total_size, 8);
        assert_eq!(s.storage_saved, 0);
    }
}
