use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, BufReader};

use crate::config::DedupConfig;
use crate::error::{AppError, Result};
use crate::events::{DedupEvent, EventSink};
use crate::hasher::{ContentHash, HashingReader};
use crate::models::{upload_path, FileRecord, NewUpload};
use crate::repository::FileRepository;
use crate::storage::BlobStore;

/// Blob paths written by uploads whose record is not committed yet.
///
/// The orphan sweep skips these so it never races an ingest in progress.
#[derive(Debug, Default)]
pub struct InflightUploads {
    paths: Mutex<HashSet<String>>,
}

impl InflightUploads {
    fn track(self: &Arc<Self>, path: &str) -> InflightGuard {
        if let Ok(mut paths) = self.paths.lock() {
            paths.insert(path.to_string());
        }
        InflightGuard {
            uploads: Arc::clone(self),
            path: path.to_string(),
        }
    }

    pub fn snapshot(&self) -> HashSet<String> {
        self.paths
            .lock()
            .map(|paths| paths.clone())
            .unwrap_or_default()
    }
}

struct InflightGuard {
    uploads: Arc<InflightUploads>,
    path: String,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if let Ok(mut paths) = self.uploads.paths.lock() {
            paths.remove(&self.path);
        }
    }
}

/// Decides original-vs-duplicate for every upload
pub struct DedupEngine {
    repo: Arc<dyn FileRepository>,
    storage: Arc<dyn BlobStore>,
    events: Arc<dyn EventSink>,
    config: DedupConfig,
    inflight: Arc<InflightUploads>,
}

impl DedupEngine {
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
            inflight: Arc::new(InflightUploads::default()),
        }
    }

    pub fn inflight(&self) -> Arc<InflightUploads> {
        Arc::clone(&self.inflight)
    }

    /// Store an upload, reusing an existing original's bytes when the
    /// content is already known.
    ///
    /// The stream is read exactly once: bytes are hashed on their way into
    /// the blob store. Nothing is persisted unless both the write and the
    /// hash complete.
    pub async fn ingest<R>(&self, reader: R, upload: NewUpload) -> Result<FileRecord>
    where
        R: AsyncRead + Send + Unpin,
    {
        let path = upload_path(&self.config.upload_prefix, &upload.original_filename);
        let _guard = self.inflight.track(&path);

        let hash = match self.write_and_hash(&path, reader, upload.declared_size).await {
            Ok(hash) => hash,
            Err(e) => {
                self.discard_blob(&path).await;
                return Err(e);
            }
        };

        match self.register(&upload, &path, &hash).await {
            Ok(record) => Ok(record),
            Err(e) => {
                self.discard_blob(&path).await;
                Err(e)
            }
        }
    }

    async fn write_and_hash<R>(&self, path: &str, reader: R, declared_size: u64) -> Result<ContentHash>
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut hashing =
            HashingReader::new(BufReader::with_capacity(self.config.chunk_size, reader));

        let written = tokio::time::timeout(
            self.config.io_timeout(),
            self.storage.put_stream(path, &mut hashing),
        )
        .await;

        let written = match written {
            Err(_) => {
                return Err(AppError::BlobWriteFailed(format!(
                    "writing {} timed out after {}s",
                    path, self.config.io_timeout_secs
                )))
            }
            Ok(Err(e)) => {
                return Err(match hashing.read_error() {
                    Some(reason) => AppError::HashComputationFailed(reason.to_string()),
                    None => AppError::BlobWriteFailed(format!("{}: {}", path, e)),
                })
            }
            Ok(Ok(written)) => written,
        };

        if written != declared_size {
            tracing::warn!(
                path,
                written,
                declared_size,
                "Upload size differs from declared size"
            );
        }

        hashing.finalize()
    }

    /// Record the written blob as a new original or as a duplicate of the
    /// existing one, retrying lost races as duplicates.
    async fn register(
        &self,
        upload: &NewUpload,
        path: &str,
        hash: &ContentHash,
    ) -> Result<FileRecord> {
        let attempts = self.config.max_race_retries + 1;

        for attempt in 1..=attempts {
            if let Some(original) = self.repo.find_original_by_hash(hash).await? {
                let record = FileRecord::new_duplicate(upload, &original);
                match self.repo.insert_duplicate(&record).await {
                    Ok(reference_count) => {
                        self.discard_blob(path).await;
                        tracing::debug!(
                            original_id = %original.id,
                            reference_count,
                            "Reference count incremented"
                        );
                        self.events.emit(DedupEvent::Deduplicated {
                            record_id: record.id.clone(),
                            original_id: original.id.clone(),
                            bytes_saved: record.storage_saved(),
                        });
                        return Ok(record);
                    }
                    // Original deleted or claimed for deletion since the
                    // lookup; keep this upload's own bytes as a new original.
                    Err(AppError::NotFound(_)) => {
                        tracing::debug!(
                            original_id = %original.id,
                            "Original went away before duplicate insert"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }

            let record = FileRecord::new_original(upload, path.to_string(), hash.clone());
            match self.repo.insert_original(&record).await {
                Ok(()) => {
                    tracing::info!(
                        id = %record.id,
                        content_hash = %hash,
                        size = record.size,
                        "Stored new original"
                    );
                    return Ok(record);
                }
                Err(AppError::DuplicateRaceLost(_)) => {
                    self.events.emit(DedupEvent::RaceLost {
                        content_hash: hash.clone(),
                        attempt,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Internal(format!(
            "Could not register upload for hash {} after {} attempts",
            hash, attempts
        )))
    }

    /// Drop bytes that no record will own. Failures only leave an orphan.
    async fn discard_blob(&self, path: &str) {
        match self.storage.delete(path).await {
            Ok(_) => {}
            Err(e) => self.events.emit(DedupEvent::BlobDeleteFailed {
                path: path.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::events::MemorySink;
    use crate::models::FileKind;
    use crate::repository::SqliteFileRepository;
    use crate::storage::{BlobReader, MemoryBlobStore};
    use bytes::Bytes;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncReadExt, ReadBuf};

    struct Fixture {
        engine: DedupEngine,
        repo: Arc<SqliteFileRepository>,
        storage: Arc<MemoryBlobStore>,
        events: Arc<MemorySink>,
    }

    async fn fixture() -> Fixture {
        let repo = Arc::new(SqliteFileRepository::new(Database::in_memory().await.unwrap()));
        let storage = Arc::new(MemoryBlobStore::new());
        let events = Arc::new(MemorySink::new());
        let engine = DedupEngine::new(
            repo.clone(),
            storage.clone(),
            events.clone(),
            DedupConfig::default(),
        );
        Fixture {
            engine,
            repo,
            storage,
            events,
        }
    }

    fn upload(name: &str, size: u64) -> NewUpload {
        NewUpload {
            original_filename: name.to_string(),
            content_type: "text/plain".to_string(),
            declared_size: size,
        }
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated upload")))
        }
    }

    #[tokio::test]
    async fn first_upload_becomes_original() {
        let f = fixture().await;
        let record = f.engine.ingest(&b"hello"[..], upload("a.txt", 5)).await.unwrap();

        assert_eq!(record.kind, FileKind::Original { reference_count: 1 });
        assert_eq!(record.actual_size(), 5);
        assert_eq!(record.content_hash, Some(ContentHash::of(b"hello")));
        assert!(record.storage_path.starts_with("uploads/"));
        assert!(record.storage_path.ends_with(".txt"));
        assert_eq!(
            f.storage.get(&record.storage_path).await.unwrap().as_ref(),
            b"hello"
        );
    }

    #[tokio::test]
    async fn same_content_reuses_original_blob() {
        let f = fixture().await;
        let a = f.engine.ingest(&b"X"[..], upload("a.txt", 1)).await.unwrap();
        let b = f.engine.ingest(&b"X"[..], upload("b.bin", 1)).await.unwrap();

        assert_eq!(b.kind, FileKind::Duplicate { original_id: a.id.clone() });
        assert_eq!(b.storage_path, a.storage_path);
        assert_eq!(b.actual_size(), 0);
        assert_eq!(f.storage.len().await, 1);

        let a_now = f.repo.get(&a.id).await.unwrap().unwrap();
        assert_eq!(a_now.reference_count(), Some(2));
        assert!(f.events.events().iter().any(|e| matches!(
            e,
            DedupEvent::Deduplicated { original_id, .. } if *original_id == a.id
        )));
    }

    #[tokio::test]
    async fn unreadable_stream_persists_nothing() {
        let f = fixture().await;
        let err = f.engine.ingest(FailingReader, upload("a.txt", 10)).await.unwrap_err();

        assert!(matches!(err, AppError::HashComputationFailed(_)));
        assert!(f.storage.is_empty().await);
        assert!(f
            .repo
            .list(&Default::default(), Default::default())
            .await
            .unwrap()
            .is_empty());
        assert!(f.engine.inflight().snapshot().is_empty());
    }

    /// Never yields a byte and never wakes.
    struct StalledReader;

    impl AsyncRead for StalledReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    /// Accepts the first few bytes of a stream, then fails like a full disk.
    struct FullDisk {
        inner: Arc<MemoryBlobStore>,
    }

    #[async_trait::async_trait]
    impl BlobStore for FullDisk {
        async fn put_stream(
            &self,
            path: &str,
            reader: &mut (dyn AsyncRead + Send + Unpin),
        ) -> Result<u64> {
            let mut head = [0u8; 4];
            let n = reader.read(&mut head).await?;
            self.inner
                .put(path, Bytes::copy_from_slice(&head[..n]))
                .await?;
            Err(AppError::Storage("no space left on device".to_string()))
        }
        async fn put(&self, path: &str, data: Bytes) -> Result<()> {
            self.inner.put(path, data).await
        }
        async fn get(&self, path: &str) -> Result<Bytes> {
            self.inner.get(path).await
        }
        async fn open_read(&self, path: &str) -> Result<BlobReader> {
            self.inner.open_read(path).await
        }
        async fn delete(&self, path: &str) -> Result<bool> {
            self.inner.delete(path).await
        }
        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }
        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.list(prefix).await
        }
        fn storage_type(&self) -> &'static str {
            "memory"
        }
    }

    #[tokio::test]
    async fn failing_blob_write_persists_nothing() {
        let repo = Arc::new(SqliteFileRepository::new(Database::in_memory().await.unwrap()));
        let inner = Arc::new(MemoryBlobStore::new());
        let engine = DedupEngine::new(
            repo.clone(),
            Arc::new(FullDisk {
                inner: inner.clone(),
            }),
            Arc::new(MemorySink::new()),
            DedupConfig::default(),
        );

        let err = engine
            .ingest(&b"more than four bytes"[..], upload("a.txt", 20))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BlobWriteFailed(_)));
        assert!(inner.is_empty().await);
        assert!(repo
            .list(&Default::default(), Default::default())
            .await
            .unwrap()
            .is_empty());
        assert!(engine.inflight().snapshot().is_empty());
    }

    #[tokio::test]
    async fn stalled_upload_times_out() {
        let repo = Arc::new(SqliteFileRepository::new(Database::in_memory().await.unwrap()));
        let storage = Arc::new(MemoryBlobStore::new());
        let engine = DedupEngine::new(
            repo.clone(),
            storage.clone(),
            Arc::new(MemorySink::new()),
            DedupConfig {
                io_timeout_secs: 1,
                ..DedupConfig::default()
            },
        );

        let err = engine
            .ingest(StalledReader, upload("a.txt", 10))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::BlobWriteFailed(ref reason) if reason.contains("timed out")));
        assert!(storage.is_empty().await);
        assert!(repo
            .list(&Default::default(), Default::default())
            .await
            .unwrap()
            .is_empty());
        assert!(engine.inflight().snapshot().is_empty());
    }

    #[tokio::test]
    async fn existing_original_absorbs_upload() {
        let f = fixture().await;
        // Another writer already registered this content under a different path.
        let winner = FileRecord::new_original(
            &upload("w.txt", 4),
            "uploads/winner.txt".to_string(),
            ContentHash::of(b"race"),
        );
        f.repo.insert_original(&winner).await.unwrap();

        let record = f.engine.ingest(&b"race"[..], upload("l.txt", 4)).await.unwrap();
        assert_eq!(record.reference_id(), Some(winner.id.as_str()));
        assert_eq!(record.storage_path, "uploads/winner.txt");
        assert!(f.storage.is_empty().await);
    }

    /// Misses the original on its first lookup, as a concurrent writer would
    /// see it just before the winner commits.
    struct StaleFirstLookup {
        inner: SqliteFileRepository,
        stale: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl FileRepository for StaleFirstLookup {
        async fn insert_original(&self, record: &FileRecord) -> Result<()> {
            self.inner.insert_original(record).await
        }
        async fn insert_duplicate(&self, record: &FileRecord) -> Result<i64> {
            self.inner.insert_duplicate(record).await
        }
        async fn find_original_by_hash(&self, hash: &ContentHash) -> Result<Option<FileRecord>> {
            if self.stale.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find_original_by_hash(hash).await
        }
        async fn get(&self, id: &str) -> Result<Option<FileRecord>> {
            self.inner.get(id).await
        }
        async fn list(
            &self,
            filter: &crate::models::FileFilter,
            ordering: crate::models::FileOrdering,
        ) -> Result<Vec<FileRecord>> {
            self.inner.list(filter, ordering).await
        }
        async fn count_duplicates_of(&self, id: &str) -> Result<u64> {
            self.inner.count_duplicates_of(id).await
        }
        async fn claim_for_delete(&self, id: &str) -> Result<crate::repository::DeleteClaim> {
            self.inner.claim_for_delete(id).await
        }
        async fn delete_duplicate(&self, id: &str, original_id: &str) -> Result<bool> {
            self.inner.delete_duplicate(id, original_id).await
        }
        async fn delete_original(&self, id: &str) -> Result<bool> {
            self.inner.delete_original(id).await
        }
        async fn missing_hash(&self) -> Result<Vec<FileRecord>> {
            self.inner.missing_hash().await
        }
        async fn set_content_hash(&self, id: &str, hash: &ContentHash) -> Result<()> {
            self.inner.set_content_hash(id, hash).await
        }
        async fn hash_collisions(&self) -> Result<Vec<(ContentHash, Vec<FileRecord>)>> {
            self.inner.hash_collisions().await
        }
        async fn merge_into(
            &self,
            canonical_id: &str,
            loser_id: &str,
            hash: &ContentHash,
        ) -> Result<crate::repository::MergeResult> {
            self.inner.merge_into(canonical_id, loser_id, hash).await
        }
        async fn reference_drift(&self) -> Result<Vec<crate::repository::ReferenceAudit>> {
            self.inner.reference_drift().await
        }
        async fn recount_references(&self, id: &str) -> Result<i64> {
            self.inner.recount_references(id).await
        }
        async fn aggregate(
            &self,
            filter: &crate::models::FileFilter,
        ) -> Result<crate::models::StorageTotals> {
            self.inner.aggregate(filter).await
        }
        async fn content_types(&self) -> Result<Vec<String>> {
            self.inner.content_types().await
        }
        async fn storage_paths(&self) -> Result<HashSet<String>> {
            self.inner.storage_paths().await
        }
    }

    #[tokio::test]
    async fn lost_race_is_retried_as_duplicate() {
        let inner = SqliteFileRepository::new(Database::in_memory().await.unwrap());
        let winner = FileRecord::new_original(
            &upload("w.txt", 4),
            "uploads/winner.txt".to_string(),
            ContentHash::of(b"race"),
        );
        inner.insert_original(&winner).await.unwrap();

        let repo = Arc::new(StaleFirstLookup {
            inner,
            stale: std::sync::atomic::AtomicBool::new(true),
        });
        let storage = Arc::new(MemoryBlobStore::new());
        let events = Arc::new(MemorySink::new());
        let engine = DedupEngine::new(
            repo.clone(),
            storage.clone(),
            events.clone(),
            DedupConfig::default(),
        );

        let record = engine.ingest(&b"race"[..], upload("l.txt", 4)).await.unwrap();

        assert_eq!(record.reference_id(), Some(winner.id.as_str()));
        assert!(storage.is_empty().await);
        assert_eq!(
            repo.get(&winner.id).await.unwrap().unwrap().reference_count(),
            Some(2)
        );
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, DedupEvent::RaceLost { attempt: 1, .. })));
    }
}
