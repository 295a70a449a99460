pub mod local;
pub mod memory;
pub mod provider;

pub use local::*;
pub use memory::*;
pub use provider::*;

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};

/// Build the blob store selected by configuration
pub fn build_blob_store(config: &StorageConfig) -> Arc<dyn BlobStore> {
    match config.backend {
        StorageBackend::Local => Arc::new(LocalBlobStore::new(&config.local_path)),
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory blob store; uploads will not survive a restart");
            Arc::new(MemoryBlobStore::new())
        }
    }
}
