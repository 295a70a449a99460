use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::storage::{BlobReader, BlobStore};

/// Blob store held entirely in process memory
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let mut data = Vec::new();
        let result = reader.read_to_end(&mut data).await;
        let written = data.len() as u64;
        // Partial content stays behind on failure, like a half-written file.
        self.blobs
            .write()
            .await
            .insert(path.to_string(), Bytes::from(data));
        result?;
        Ok(written)
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.blobs.write().await.insert(path.to_string(), data);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        self.blobs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Blob not found: {}", path)))
    }

    async fn open_read(&self, path: &str) -> Result<BlobReader> {
        let data = self.get(path).await?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        Ok(self.blobs.write().await.remove(path).is_some())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(path))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        Ok(self
            .blobs
            .read()
            .await
            .keys()
            .filter(|path| {
                path.strip_prefix(prefix)
                    .map_or(false, |rest| prefix.is_empty() || rest.starts_with('/'))
            })
            .cloned()
            .collect())
    }

    fn storage_type(&self) -> &'static str {
        "memory"
    }
}
