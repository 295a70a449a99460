pub mod deletion;
pub mod file;
pub mod ingest;
pub mod reconcile;
pub mod stats;

pub use deletion::{DeleteOutcome, DeletionCoordinator};
pub use file::FileService;
pub use ingest::{DedupEngine, InflightUploads};
pub use reconcile::{HashCollision, MergeReport, RecheckReport, Reconciler};
pub use stats::StatsService;

use std::sync::Arc;

use crate::config::DedupConfig;
use crate::events::EventSink;
use crate::repository::FileRepository;
use crate::storage::BlobStore;

/// Every service over one repository, blob store and event sink
pub struct Services {
    pub ingest: DedupEngine,
    pub deletion: DeletionCoordinator,
    pub stats: StatsService,
    pub reconcile: Reconciler,
    pub files: FileService,
}

impl Services {
    pub fn new(
        repo: Arc<dyn FileRepository>,
        storage: Arc<dyn BlobStore>,
        events: Arc<dyn EventSink>,
        config: DedupConfig,
    ) -> Self {
        let ingest = DedupEngine::new(repo.clone(), storage.clone(), events.clone(), config.clone());
        let reconcile = Reconciler::new(
            repo.clone(),
            storage.clone(),
            events.clone(),
            config.clone(),
            ingest.inflight(),
        );

        Self {
            deletion: DeletionCoordinator::new(repo.clone(), storage.clone(), events, config),
            stats: StatsService::new(repo.clone()),
            files: FileService::new(repo, storage),
            reconcile,
            ingest,
        }
    }
}
