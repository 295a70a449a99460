use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dedupvault::config::Config;
use dedupvault::db::Database;
use dedupvault::events::TracingSink;
use dedupvault::repository::SqliteFileRepository;
use dedupvault::services::Services;
use dedupvault::storage::build_blob_store;
use dedupvault::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dedupvault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting dedupvault...");

    let config = Config::load()?;
    tracing::info!("Configuration loaded");

    let db = Database::new(&config.database.path, config.database.max_connections).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized");

    let storage = build_blob_store(&config.storage);
    tracing::info!(backend = storage.storage_type(), "Blob store ready");

    let services = Services::new(
        Arc::new(SqliteFileRepository::new(db)),
        storage,
        Arc::new(TracingSink),
        config.dedup.clone(),
    );

    let state = AppState {
        services: Arc::new(services),
    };

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
