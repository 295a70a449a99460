use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::path::Path;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::hasher::ContentHash;

/// Whether a record owns its bytes or borrows another record's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// Owns the blob at `storage_path`. The count includes the original itself.
    Original { reference_count: i64 },
    /// Shares the blob of `original_id`, which is always an original.
    Duplicate { original_id: String },
}

/// One logical upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: String,
    pub storage_path: String,
    pub original_filename: String,
    pub content_type: String,
    /// Logical size as declared by the uploader.
    pub size: u64,
    pub content_hash: Option<ContentHash>,
    pub kind: FileKind,
    pub uploaded_at: DateTime<Utc>,
}

impl FileRecord {
    /// A fresh original owning the blob just written at `storage_path`.
    pub fn new_original(
        upload: &NewUpload,
        storage_path: String,
        content_hash: ContentHash,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            storage_path,
            original_filename: upload.original_filename.clone(),
            content_type: upload.content_type.clone(),
            size: upload.declared_size,
            content_hash: Some(content_hash),
            kind: FileKind::Original { reference_count: 1 },
            uploaded_at: now(),
        }
    }

    /// A fresh duplicate sharing `original`'s blob.
    pub fn new_duplicate(upload: &NewUpload, original: &FileRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            storage_path: original.storage_path.clone(),
            original_filename: upload.original_filename.clone(),
            content_type: upload.content_type.clone(),
            size: upload.declared_size,
            content_hash: original.content_hash.clone(),
            kind: FileKind::Duplicate {
                original_id: original.id.clone(),
            },
            uploaded_at: now(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self.kind, FileKind::Duplicate { .. })
    }

    pub fn reference_id(&self) -> Option<&str> {
        match &self.kind {
            FileKind::Duplicate { original_id } => Some(original_id),
            FileKind::Original { .. } => None,
        }
    }

    pub fn reference_count(&self) -> Option<i64> {
        match self.kind {
            FileKind::Original { reference_count } => Some(reference_count),
            FileKind::Duplicate { .. } => None,
        }
    }

    /// Bytes in the blob store attributable to this record.
    pub fn actual_size(&self) -> u64 {
        match self.kind {
            FileKind::Original { .. } => self.size,
            FileKind::Duplicate { .. } => 0,
        }
    }

    /// Space this record avoided occupying.
    pub fn storage_saved(&self) -> u64 {
        self.size - self.actual_size()
    }
}

/// Caller-supplied metadata for an upload.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub original_filename: String,
    pub content_type: String,
    pub declared_size: u64,
}

/// `files` table row
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub id: String,
    pub storage_path: String,
    pub original_filename: String,
    pub content_type: String,
    pub size: i64,
    pub actual_size: i64,
    pub content_hash: String,
    pub is_duplicate: bool,
    pub reference_id: Option<String>,
    pub reference_count: i64,
    pub uploaded_at: String,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = AppError;

    fn try_from(row: FileRow) -> Result<Self> {
        let kind = match (row.is_duplicate, row.reference_id) {
            (false, None) => FileKind::Original {
                reference_count: row.reference_count,
            },
            (true, Some(original_id)) => FileKind::Duplicate { original_id },
            (is_duplicate, reference_id) => {
                return Err(AppError::Internal(format!(
                    "File {} has inconsistent duplicate state (is_duplicate={}, reference_id={:?})",
                    row.id, is_duplicate, reference_id
                )))
            }
        };

        let uploaded_at = DateTime::parse_from_rfc3339(&row.uploaded_at)
            .map_err(|e| {
                AppError::Internal(format!("File {} has invalid uploaded_at: {}", row.id, e))
            })?
            .with_timezone(&Utc);

        Ok(Self {
            id: row.id,
            storage_path: row.storage_path,
            original_filename: row.original_filename,
            content_type: row.content_type,
            size: row.size.max(0) as u64,
            content_hash: ContentHash::parse(&row.content_hash),
            kind,
            uploaded_at,
        })
    }
}

/// File response
#[derive(Debug, Clone, Serialize)]
pub struct FileResponse {
    pub id: String,
    pub original_filename: String,
    pub content_type: String,
    pub size: u64,
    pub actual_size: u64,
    pub uploaded_at: String,
    pub content_hash: Option<String>,
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_count: Option<i64>,
    pub storage_saved: u64,
}

impl From<FileRecord> for FileResponse {
    fn from(record: FileRecord) -> Self {
        Self {
            is_duplicate: record.is_duplicate(),
            reference_id: record.reference_id().map(str::to_string),
            reference_count: record.reference_count(),
            actual_size: record.actual_size(),
            storage_saved: record.storage_saved(),
            uploaded_at: format_timestamp(&record.uploaded_at),
            content_hash: record.content_hash.map(|h| h.to_string()),
            id: record.id,
            original_filename: record.original_filename,
            content_type: record.content_type,
            size: record.size,
        }
    }
}

/// Current time at the precision timestamps are stored with.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Storage timestamps: fixed-width RFC 3339 so text order matches time order.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Blob path for a new upload: `<prefix>/<uuid>.<ext>`.
pub fn upload_path(prefix: &str, original_filename: &str) -> String {
    let name = Uuid::new_v4().to_string();
    let file_name = match Path::new(original_filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
    {
        Some(ext) => format!("{}.{}", name, ext),
        None => name,
    };

    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name
    } else {
        format!("{}/{}", prefix, file_name)
    }
}
