pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod hasher;
pub mod models;
pub mod repository;
pub mod services;
pub mod storage;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::services::Services;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let file_routes = Router::new()
        .route(
            "/files",
            get(handlers::file::list_files).post(handlers::file::upload_file),
        )
        .route("/files/stats", get(handlers::stats::get_stats))
        .route("/files/types", get(handlers::stats::list_content_types))
        .route(
            "/files/:id",
            get(handlers::file::get_file).delete(handlers::file::delete_file),
        )
        .route("/files/:id/download", get(handlers::file::download_file))
        // Uploads are spooled to disk, not buffered.
        .layer(DefaultBodyLimit::disable());

    let maintenance_routes = Router::new()
        .route("/maintenance/recheck", post(handlers::maintenance::recheck))
        .route(
            "/maintenance/reference-counts",
            post(handlers::maintenance::recompute_reference_counts),
        )
        .route("/maintenance/merge", post(handlers::maintenance::merge_collisions))
        .route("/maintenance/sweep", post(handlers::maintenance::sweep_orphans));

    Router::new()
        .nest("/api/v1", file_routes.merge(maintenance_routes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
