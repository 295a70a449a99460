use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::Result;

/// Readable blob handle
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Path-addressed byte storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stream `reader` to `path` until EOF and return the bytes written.
    ///
    /// Errors from `reader` are returned unchanged; whatever was written
    /// before the failure may remain at `path`.
    async fn put_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64>;

    /// Upload data to storage
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Download data from storage
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Open a blob for streaming reads
    async fn open_read(&self, path: &str) -> Result<BlobReader>;

    /// Delete data from storage. `false` if nothing was there.
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Check if a blob exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// All blob paths under `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}
