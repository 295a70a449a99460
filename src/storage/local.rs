use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};

use crate::error::{AppError, Result};
use crate::storage::{BlobReader, BlobStore};

/// Local file system blob store
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn get_full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(AppError::BadRequest(format!("Invalid blob path: {}", path)));
        }
        Ok(self.base_path.join(relative))
    }

    async fn ensure_parent(full_path: &Path) -> Result<()> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Create the file, recreating its parents once if a concurrent prune
    /// removed them after `ensure_parent`.
    async fn create_file(full_path: &Path) -> Result<fs::File> {
        Self::ensure_parent(full_path).await?;
        match fs::File::create(full_path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::ensure_parent(full_path).await?;
                Ok(fs::File::create(full_path).await?)
            }
            result => Ok(result?),
        }
    }

    /// Remove empty directories between `full_path` and the base path.
    ///
    /// Top-level directories such as `uploads/` are kept.
    async fn prune_empty_parents(&self, full_path: &Path) -> Result<()> {
        let mut current_dir = full_path.parent().map(|p| p.to_path_buf());
        while let Some(dir) = current_dir {
            if dir == self.base_path || dir.parent() == Some(self.base_path.as_path()) {
                break;
            }
            match fs::read_dir(&dir).await {
                Ok(mut entries) => {
                    if entries.next_entry().await?.is_some() {
                        break;
                    }
                    let _ = fs::remove_dir(&dir).await;
                }
                Err(_) => break,
            }
            current_dir = dir.parent().map(|p| p.to_path_buf());
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let full_path = self.get_full_path(path)?;
        let file = Self::create_file(&full_path).await?;
        let mut writer = BufWriter::new(file);
        let written = tokio::io::copy(reader, &mut writer).await?;
        writer.flush().await?;
        writer.get_ref().sync_all().await?;

        tracing::debug!("Saved {} bytes to {:?}", written, full_path);
        Ok(written)
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let full_path = self.get_full_path(path)?;
        let mut file = Self::create_file(&full_path).await?;
        file.write_all(&data).await?;
        file.flush().await?;

        tracing::debug!("Saved file to {:?}", full_path);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let full_path = self.get_full_path(path)?;

        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("Blob not found: {}", path))
            } else {
                AppError::Storage(format!("Failed to read blob: {}", e))
            }
        })?;

        Ok(Bytes::from(data))
    }

    async fn open_read(&self, path: &str) -> Result<BlobReader> {
        let full_path = self.get_full_path(path)?;
        let file = fs::File::open(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("Blob not found: {}", path))
            } else {
                AppError::Storage(format!("Failed to open blob: {}", e))
            }
        })?;
        Ok(Box::new(file))
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let full_path = self.get_full_path(path)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::debug!("Deleted file {:?}", full_path);
                self.prune_empty_parents(&full_path).await?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::BlobDeleteFailed(format!("{}: {}", path, e))),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.get_full_path(path)?;
        Ok(fs::try_exists(&full_path).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.get_full_path(prefix)?;
        let mut paths = Vec::new();
        let mut pending = vec![root];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(entry_path);
                } else if let Ok(relative) = entry_path.strip_prefix(&self.base_path) {
                    let parts: Vec<String> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    paths.push(parts.join("/"));
                }
            }
        }

        paths.sort();
        Ok(paths)
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn stream_roundtrip_and_prune_on_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let mut src: &[u8] = b"hello blob";
        let written = store.put_stream("uploads/a/b.txt", &mut src).await.unwrap();
        assert_eq!(written, 10);
        assert!(store.exists("uploads/a/b.txt").await.unwrap());

        let mut reader = store.open_read("uploads/a/b.txt").await.unwrap();
        let mut back = Vec::new();
        reader.read_to_end(&mut back).await.unwrap();
        assert_eq!(back, b"hello blob");

        assert!(store.delete("uploads/a/b.txt").await.unwrap());
        assert!(!dir.path().join("uploads/a").exists());
        assert!(!store.delete("uploads/a/b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn deleting_last_blob_keeps_top_level_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let mut src: &[u8] = b"only";
        store.put_stream("uploads/only.txt", &mut src).await.unwrap();
        assert!(store.delete("uploads/only.txt").await.unwrap());
        assert!(dir.path().join("uploads").is_dir());

        // A removed parent is recreated on write.
        std::fs::remove_dir(dir.path().join("uploads")).unwrap();
        let mut src: &[u8] = b"next";
        assert_eq!(store.put_stream("uploads/next.txt", &mut src).await.unwrap(), 4);
        assert_eq!(store.get("uploads/next.txt").await.unwrap().as_ref(), b"next");
    }

    #[tokio::test]
    async fn list_returns_relative_slash_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        store.put("uploads/1.txt", Bytes::from_static(b"1")).await.unwrap();
        store.put("uploads/nested/2.txt", Bytes::from_static(b"2")).await.unwrap();
        store.put("other/3.txt", Bytes::from_static(b"3")).await.unwrap();

        let listed = store.list("uploads").await.unwrap();
        assert_eq!(listed, vec!["uploads/1.txt", "uploads/nested/2.txt"]);
        assert!(store.list("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(matches!(
            store.get("../etc/passwd").await,
            Err(AppError::BadRequest(_))
        ));
    }
}
