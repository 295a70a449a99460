use bytes::Bytes;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{FileFilter, FileOrdering, FileRecord};
use crate::repository::FileRepository;
use crate::storage::BlobStore;

/// Read side of the file catalogue
pub struct FileService {
    repo: Arc<dyn FileRepository>,
    storage: Arc<dyn BlobStore>,
}

impl FileService {
    pub fn new(repo: Arc<dyn FileRepository>, storage: Arc<dyn BlobStore>) -> Self {
        Self { repo, storage }
    }

    pub async fn get_file(&self, id: &str) -> Result<FileRecord> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    pub async fn list_files(
        &self,
        filter: &FileFilter,
        ordering: FileOrdering,
    ) -> Result<Vec<FileRecord>> {
        self.repo.list(filter, ordering).await
    }

    /// Distinct content types across all records
    pub async fn content_types(&self) -> Result<Vec<String>> {
        self.repo.content_types().await
    }

    /// A record and the bytes behind it. Duplicates resolve to their original's blob.
    pub async fn read_blob(&self, id: &str) -> Result<(FileRecord, Bytes)> {
        let record = self.get_file(id).await?;
        let data = self.storage.get(&record.storage_path).await?;
        Ok((record, data))
    }
}
