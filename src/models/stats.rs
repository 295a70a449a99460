use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Metadata filter shared by listing and statistics
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileFilter {
    /// Case-insensitive exact match
    pub content_type: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub uploaded_after: Option<DateTime<Utc>>,
    pub uploaded_before: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the original filename
    pub search: Option<String>,
    pub is_duplicate: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    OriginalFilename,
    Size,
    UploadedAt,
    ContentType,
}

impl OrderField {
    pub fn column(&self) -> &'static str {
        match self {
            OrderField::OriginalFilename => "original_filename",
            OrderField::Size => "size",
            OrderField::UploadedAt => "uploaded_at",
            OrderField::ContentType => "content_type",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOrdering {
    pub field: OrderField,
    pub descending: bool,
}

impl Default for FileOrdering {
    /// Newest first
    fn default() -> Self {
        Self {
            field: OrderField::UploadedAt,
            descending: true,
        }
    }
}

impl std::str::FromStr for FileOrdering {
    type Err = AppError;

    /// Parses `field` or `-field`.
    fn from_str(s: &str) -> Result<Self> {
        let (descending, name) = match s.trim().strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.trim()),
        };
        let field = match name {
            "original_filename" => OrderField::OriginalFilename,
            "size" => OrderField::Size,
            "uploaded_at" => OrderField::UploadedAt,
            "content_type" | "file_type" => OrderField::ContentType,
            other => {
                return Err(AppError::BadRequest(format!(
                    "Unknown ordering field: {}",
                    other
                )))
            }
        };
        Ok(Self { field, descending })
    }
}

/// File count and logical bytes for one content type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ContentTypeStat {
    pub content_type: String,
    pub count: i64,
    pub total_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SizeRange {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

/// Raw sums as the repository computes them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageTotals {
    pub total_files: u64,
    pub unique_files: u64,
    pub duplicate_files: u64,
    pub total_size: u64,
    pub actual_size: u64,
    pub size_range: SizeRange,
    pub content_types: Vec<ContentTypeStat>,
}

/// Deduplication statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStats {
    pub total_files: u64,
    pub unique_files: u64,
    pub duplicate_files: u64,
    pub total_size: u64,
    pub actual_size: u64,
    pub storage_saved: u64,
    pub storage_saved_percentage: f64,
    pub content_types: Vec<ContentTypeStat>,
    pub size_range: SizeRange,
}

impl From<StorageTotals> for StorageStats {
    fn from(totals: StorageTotals) -> Self {
        let storage_saved = totals.total_size.saturating_sub(totals.actual_size);
        let storage_saved_percentage = if totals.total_size == 0 {
            0.0
        } else {
            storage_saved as f64 / totals.total_size as f64 * 100.0
        };

        Self {
            total_files: totals.total_files,
            unique_files: totals.unique_files,
            duplicate_files: totals.duplicate_files,
            total_size: totals.total_size,
            actual_size: totals.actual_size,
            storage_saved,
            storage_saved_percentage,
            content_types: totals.content_types,
            size_range: totals.size_range,
        }
    }
}
