use axum::{extract::State, Json};

use crate::error::{ApiResponse, Result};
use crate::repository::ReferenceAudit;
use crate::services::{MergeReport, RecheckReport};
use crate::AppState;

/// POST /api/v1/maintenance/recheck
pub async fn recheck(State(state): State<AppState>) -> Result<Json<ApiResponse<RecheckReport>>> {
    let report = state.services.reconcile.recheck_all().await?;
    Ok(Json(ApiResponse::success(report)))
}

/// POST /api/v1/maintenance/reference-counts
pub async fn recompute_reference_counts(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ReferenceAudit>>>> {
    let repaired = state.services.reconcile.recompute_reference_counts().await?;
    Ok(Json(ApiResponse::success(repaired)))
}

/// Recheck, then merge every collision found
/// POST /api/v1/maintenance/merge
pub async fn merge_collisions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<MergeReport>>>> {
    let report = state.services.reconcile.recheck_all().await?;

    let mut merged = Vec::with_capacity(report.collisions.len());
    for collision in &report.collisions {
        merged.push(state.services.reconcile.merge_collision(collision).await?);
    }
    Ok(Json(ApiResponse::success(merged)))
}

/// POST /api/v1/maintenance/sweep
pub async fn sweep_orphans(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<String>>>> {
    let swept = state.services.reconcile.sweep_orphans().await?;
    Ok(Json(ApiResponse::success(swept)))
}
