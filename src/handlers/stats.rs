use axum::{
    extract::{Query, State},
    Json,
};

use crate::error::{ApiResponse, Result};
use crate::models::{FileFilter, StorageStats};
use crate::AppState;

/// Deduplication statistics, optionally filtered
/// GET /api/v1/files/stats
pub async fn get_stats(
    State(state): State<AppState>,
    Query(filter): Query<FileFilter>,
) -> Result<Json<ApiResponse<StorageStats>>> {
    let stats = state.services.stats.compute_stats(&filter).await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// GET /api/v1/files/types
pub async fn list_content_types(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<String>>>> {
    let types = state.services.files.content_types().await?;
    Ok(Json(ApiResponse::success(types)))
}
