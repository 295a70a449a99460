use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use std::path::{Path as FsPath, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{FileFilter, FileOrdering, FileResponse, NewUpload};
use crate::services::DeleteOutcome;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct OrderingQuery {
    pub ordering: Option<String>,
}

/// List files
/// GET /api/v1/files?content_type=&min_size=&search=&ordering=-size
pub async fn list_files(
    State(state): State<AppState>,
    Query(filter): Query<FileFilter>,
    Query(query): Query<OrderingQuery>,
) -> Result<Json<ApiResponse<Vec<FileResponse>>>> {
    let ordering = match query.ordering.as_deref() {
        Some(s) if !s.is_empty() => s.parse()?,
        _ => FileOrdering::default(),
    };

    let files = state.services.files.list_files(&filter, ordering).await?;
    Ok(Json(ApiResponse::success(
        files.into_iter().map(FileResponse::from).collect(),
    )))
}

/// Get a specific file
/// GET /api/v1/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let file = state.services.files.get_file(&id).await?;
    Ok(Json(ApiResponse::success(file.into())))
}

/// Upload body spooled to the temp directory, removed when dropped
struct TempUpload {
    path: PathBuf,
}

impl TempUpload {
    async fn create() -> Result<(Self, tokio::fs::File)> {
        let path = std::env::temp_dir().join(format!("dedupvault_upload_{}", Uuid::new_v4()));
        let file = tokio::fs::File::create(&path).await.map_err(|e| {
            AppError::Internal(format!("Failed to create temp file: {}", e))
        })?;
        Ok((Self { path }, file))
    }

    fn path(&self) -> &FsPath {
        &self.path
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::error!("Failed to remove temp file {:?}: {}", self.path, e);
            }
        }
    }
}

/// Upload a file
/// POST /api/v1/files
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<FileResponse>>> {
    let mut spooled: Option<TempUpload> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        if spooled.is_some() {
            return Err(AppError::BadRequest("Only one file per upload".to_string()));
        }

        file_name = field.file_name().map(|s| s.to_string());
        content_type = field.content_type().map(|s| s.to_string());

        let (temp, mut file) = TempUpload::create().await?;
        spooled = Some(temp);

        while let Some(chunk) = field.chunk().await.map_err(|e| {
            AppError::BadRequest(format!("Failed to read file chunk: {}", e))
        })? {
            file.write_all(&chunk).await.map_err(|e| {
                AppError::Internal(format!("Failed to write to temp file: {}", e))
            })?;
        }

        file.flush().await.map_err(|e| {
            AppError::Internal(format!("Failed to flush temp file: {}", e))
        })?;
    }

    let temp = spooled.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;
    let record = ingest_spooled(&state, temp.path(), file_name, content_type).await?;
    Ok(Json(ApiResponse::success(record.into())))
}

async fn ingest_spooled(
    state: &AppState,
    temp_path: &FsPath,
    file_name: Option<String>,
    content_type: Option<String>,
) -> Result<crate::models::FileRecord> {
    let original_filename = file_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;

    let file = tokio::fs::File::open(temp_path).await?;
    let declared_size = file.metadata().await?.len();

    let upload = NewUpload {
        original_filename,
        content_type: content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
        declared_size,
    };
    state.services.ingest.ingest(file, upload).await
}

/// Download a file
/// GET /api/v1/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    let (file, data) = state.services.files.read_blob(&id).await?;

    let content_type = if file.content_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        file.content_type.clone()
    };

    let fallback_name = file.original_filename.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(&file.original_filename);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}

/// Delete a file
/// DELETE /api/v1/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<DeleteOutcome>>> {
    match state.services.deletion.delete(&id).await? {
        DeleteOutcome::Retained { dependents } => Err(AppError::Conflict(format!(
            "File is still referenced by {} duplicate(s)",
            dependents
        ))),
        outcome => Ok(Json(ApiResponse::success(outcome))),
    }
}
