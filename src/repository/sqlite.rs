use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::hasher::ContentHash;
use crate::models::{
    format_timestamp, ContentTypeStat, FileFilter, FileOrdering, FileRecord, FileRow, SizeRange,
    StorageTotals,
};
use crate::repository::{DeleteClaim, FileRepository, MergeResult, ReferenceAudit};

/// `FileRepository` over the SQLite `files` table
#[derive(Clone)]
pub struct SqliteFileRepository {
    db: Database,
}

impl SqliteFileRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn to_db_int(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| AppError::BadRequest(format!("Value {} is out of range", value)))
}

fn rows_to_records(rows: Vec<FileRow>) -> Result<Vec<FileRecord>> {
    rows.into_iter().map(FileRecord::try_from).collect()
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Append `AND ...` clauses for every set filter field
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &FileFilter) -> Result<()> {
    if let Some(ref content_type) = filter.content_type {
        qb.push(" AND lower(content_type) = lower(")
            .push_bind(content_type.clone())
            .push(")");
    }
    if let Some(min) = filter.min_size {
        qb.push(" AND size >= ").push_bind(to_db_int(min)?);
    }
    if let Some(max) = filter.max_size {
        qb.push(" AND size <= ").push_bind(to_db_int(max)?);
    }
    if let Some(ref after) = filter.uploaded_after {
        qb.push(" AND uploaded_at >= ").push_bind(format_timestamp(after));
    }
    if let Some(ref before) = filter.uploaded_before {
        qb.push(" AND uploaded_at <= ").push_bind(format_timestamp(before));
    }
    if let Some(ref search) = filter.search {
        if !search.is_empty() {
            qb.push(" AND lower(original_filename) LIKE ")
                .push_bind(like_pattern(search))
                .push(" ESCAPE '\\'");
        }
    }
    if let Some(is_duplicate) = filter.is_duplicate {
        qb.push(" AND is_duplicate = ").push_bind(is_duplicate);
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct TotalsRow {
    total_files: i64,
    unique_files: i64,
    total_size: i64,
    actual_size: i64,
    min_size: Option<i64>,
    max_size: Option<i64>,
}

#[async_trait]
impl FileRepository for SqliteFileRepository {
    async fn insert_original(&self, record: &FileRecord) -> Result<()> {
        let hash = record
            .content_hash
            .as_ref()
            .ok_or_else(|| AppError::Internal(format!("Original {} has no content hash", record.id)))?;
        let reference_count = record
            .reference_count()
            .ok_or_else(|| AppError::Internal(format!("Record {} is not an original", record.id)))?;

        let result = sqlx::query(
            r#"
            INSERT INTO files (id, storage_path, original_filename, content_type, size, actual_size,
                               content_hash, is_duplicate, reference_id, reference_count, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, NULL, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.storage_path)
        .bind(&record.original_filename)
        .bind(&record.content_type)
        .bind(to_db_int(record.size)?)
        .bind(to_db_int(record.actual_size())?)
        .bind(hash.as_str())
        .bind(reference_count)
        .bind(format_timestamp(&record.uploaded_at))
        .execute(self.db.pool())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AppError::DuplicateRaceLost(hash.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_duplicate(&self, record: &FileRecord) -> Result<i64> {
        let original_id = record
            .reference_id()
            .ok_or_else(|| AppError::Internal(format!("Record {} is not a duplicate", record.id)))?;
        let hash = record
            .content_hash
            .as_ref()
            .map(|h| h.as_str().to_string())
            .unwrap_or_default();

        let mut tx = self.db.pool().begin().await?;

        let reference_count: Option<i64> = sqlx::query_scalar(
            "UPDATE files SET reference_count = reference_count + 1 WHERE id = ? AND is_duplicate = 0 AND pending_delete = 0 RETURNING reference_count",
        )
        .bind(original_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(reference_count) = reference_count else {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Original {} not found", original_id)));
        };

        sqlx::query(
            r#"
            INSERT INTO files (id, storage_path, original_filename, content_type, size, actual_size,
                               content_hash, is_duplicate, reference_id, reference_count, uploaded_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, 1, ?, 0, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.storage_path)
        .bind(&record.original_filename)
        .bind(&record.content_type)
        .bind(to_db_int(record.size)?)
        .bind(hash)
        .bind(original_id)
        .bind(format_timestamp(&record.uploaded_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reference_count)
    }

    async fn find_original_by_hash(&self, hash: &ContentHash) -> Result<Option<FileRecord>> {
        let row: Option<FileRow> = sqlx::query_as(
            "SELECT * FROM files WHERE content_hash = ? AND is_duplicate = 0 AND pending_delete = 0 ORDER BY uploaded_at ASC, id ASC LIMIT 1",
        )
        .bind(hash.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>> {
        let row: Option<FileRow> = sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn list(&self, filter: &FileFilter, ordering: FileOrdering) -> Result<Vec<FileRecord>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM files WHERE 1 = 1");
        push_filter(&mut qb, filter)?;
        qb.push(format!(
            " ORDER BY {} {}, id ASC",
            ordering.field.column(),
            if ordering.descending { "DESC" } else { "ASC" }
        ));

        let rows: Vec<FileRow> = qb.build_query_as().fetch_all(self.db.pool()).await?;
        rows_to_records(rows)
    }

    async fn count_duplicates_of(&self, id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE reference_id = ?")
            .bind(id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn claim_for_delete(&self, id: &str) -> Result<DeleteClaim> {
        let mut tx = self.db.pool().begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE files SET pending_delete = 1
            WHERE id = ? AND is_duplicate = 0
              AND NOT EXISTS (SELECT 1 FROM files d WHERE d.reference_id = files.id)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let claim = if claimed {
            DeleteClaim::Claimed
        } else {
            let dependents: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE reference_id = ?")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await?;
            if dependents > 0 {
                DeleteClaim::Referenced(dependents as u64)
            } else {
                DeleteClaim::Missing
            }
        };

        tx.commit().await?;
        Ok(claim)
    }

    async fn delete_duplicate(&self, id: &str, original_id: &str) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        let decremented = sqlx::query(
            "UPDATE files SET reference_count = reference_count - 1 WHERE id = ? AND is_duplicate = 0 AND reference_count > 0",
        )
        .bind(original_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let deleted = sqlx::query("DELETE FROM files WHERE id = ? AND is_duplicate = 1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Duplicate {} not found", id)));
        }

        tx.commit().await?;
        Ok(decremented)
    }

    async fn delete_original(&self, id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM files WHERE id = ? AND is_duplicate = 0")
            .bind(id)
            .execute(self.db.pool())
            .await?
            .rows_affected();
        Ok(deleted == 1)
    }

    async fn missing_hash(&self) -> Result<Vec<FileRecord>> {
        let rows: Vec<FileRow> = sqlx::query_as(
            "SELECT * FROM files WHERE content_hash = '' AND pending_delete = 0 ORDER BY uploaded_at ASC, id ASC",
        )
        .fetch_all(self.db.pool())
        .await?;
        rows_to_records(rows)
    }

    async fn set_content_hash(&self, id: &str, hash: &ContentHash) -> Result<()> {
        let result = sqlx::query("UPDATE files SET content_hash = ? WHERE id = ?")
            .bind(hash.as_str())
            .bind(id)
            .execute(self.db.pool())
            .await;

        match result {
            Ok(r) if r.rows_affected() == 0 => {
                Err(AppError::NotFound(format!("File {} not found", id)))
            }
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(AppError::DuplicateRaceLost(hash.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn hash_collisions(&self) -> Result<Vec<(ContentHash, Vec<FileRecord>)>> {
        let rows: Vec<FileRow> = sqlx::query_as(
            r#"
            SELECT * FROM files
            WHERE is_duplicate = 0 AND pending_delete = 0 AND content_hash IN (
                SELECT content_hash FROM files
                WHERE is_duplicate = 0 AND pending_delete = 0 AND content_hash <> ''
                GROUP BY content_hash HAVING COUNT(*) > 1
            )
            ORDER BY content_hash ASC, uploaded_at ASC, id ASC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut groups: Vec<(ContentHash, Vec<FileRecord>)> = Vec::new();
        for record in rows_to_records(rows)? {
            let Some(hash) = record.content_hash.clone() else {
                continue;
            };
            match groups.last_mut() {
                Some((current, members)) if *current == hash => members.push(record),
                _ => groups.push((hash, vec![record])),
            }
        }
        Ok(groups)
    }

    async fn merge_into(
        &self,
        canonical_id: &str,
        loser_id: &str,
        hash: &ContentHash,
    ) -> Result<MergeResult> {
        if canonical_id == loser_id {
            return Err(AppError::BadRequest("Cannot merge a file into itself".to_string()));
        }

        let mut tx = self.db.pool().begin().await?;

        let canonical_path: Option<String> = sqlx::query_scalar(
            "SELECT storage_path FROM files WHERE id = ? AND is_duplicate = 0 AND pending_delete = 0",
        )
        .bind(canonical_id)
        .fetch_optional(&mut *tx)
        .await?;
        let superseded_path: Option<String> = sqlx::query_scalar(
            "SELECT storage_path FROM files WHERE id = ? AND is_duplicate = 0 AND pending_delete = 0",
        )
        .bind(loser_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (Some(canonical_path), Some(superseded_path)) = (canonical_path, superseded_path)
        else {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!(
                "Originals {} and {} are not both present",
                canonical_id, loser_id
            )));
        };

        let moved_dependents = sqlx::query(
            "UPDATE files SET reference_id = ?, storage_path = ?, content_hash = ? WHERE reference_id = ?",
        )
        .bind(canonical_id)
        .bind(&canonical_path)
        .bind(hash.as_str())
        .bind(loser_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            UPDATE files
            SET is_duplicate = 1, reference_id = ?, storage_path = ?, content_hash = ?,
                actual_size = 0, reference_count = 0
            WHERE id = ?
            "#,
        )
        .bind(canonical_id)
        .bind(&canonical_path)
        .bind(hash.as_str())
        .bind(loser_id)
        .execute(&mut *tx)
        .await?;

        let reference_count: i64 = sqlx::query_scalar(
            r#"
            UPDATE files
            SET content_hash = ?,
                reference_count = 1 + (SELECT COUNT(*) FROM files d WHERE d.reference_id = files.id)
            WHERE id = ?
            RETURNING reference_count
            "#,
        )
        .bind(hash.as_str())
        .bind(canonical_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(MergeResult {
            superseded_path,
            moved_dependents,
            reference_count,
        })
    }

    async fn reference_drift(&self) -> Result<Vec<ReferenceAudit>> {
        let drift: Vec<ReferenceAudit> = sqlx::query_as(
            r#"
            SELECT id, stored, actual FROM (
                SELECT o.id AS id,
                       o.reference_count AS stored,
                       1 + (SELECT COUNT(*) FROM files d WHERE d.reference_id = o.id) AS actual,
                       o.uploaded_at AS uploaded_at
                FROM files o
                WHERE o.is_duplicate = 0
            )
            WHERE stored <> actual
            ORDER BY uploaded_at ASC, id ASC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(drift)
    }

    async fn recount_references(&self, id: &str) -> Result<i64> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE files
            SET reference_count = 1 + (SELECT COUNT(*) FROM files d WHERE d.reference_id = files.id)
            WHERE id = ? AND is_duplicate = 0
            RETURNING reference_count
            "#,
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        count.ok_or_else(|| AppError::NotFound(format!("Original {} not found", id)))
    }

    async fn aggregate(&self, filter: &FileFilter) -> Result<StorageTotals> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT COUNT(*) AS total_files,
                   COALESCE(SUM(CASE WHEN is_duplicate = 0 THEN 1 ELSE 0 END), 0) AS unique_files,
                   COALESCE(SUM(size), 0) AS total_size,
                   COALESCE(SUM(actual_size), 0) AS actual_size,
                   MIN(size) AS min_size,
                   MAX(size) AS max_size
            FROM files WHERE 1 = 1
            "#,
        );
        push_filter(&mut qb, filter)?;
        let totals: TotalsRow = qb.build_query_as().fetch_one(self.db.pool()).await?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT content_type, COUNT(*) AS count, COALESCE(SUM(size), 0) AS total_size FROM files WHERE 1 = 1",
        );
        push_filter(&mut qb, filter)?;
        qb.push(" GROUP BY content_type ORDER BY count DESC, content_type ASC");
        let content_types: Vec<ContentTypeStat> =
            qb.build_query_as().fetch_all(self.db.pool()).await?;

        let total_files = totals.total_files.max(0) as u64;
        let unique_files = totals.unique_files.max(0) as u64;

        Ok(StorageTotals {
            total_files,
            unique_files,
            duplicate_files: total_files - unique_files,
            total_size: totals.total_size.max(0) as u64,
            actual_size: totals.actual_size.max(0) as u64,
            size_range: SizeRange {
                min: totals.min_size.map(|v| v.max(0) as u64),
                max: totals.max_size.map(|v| v.max(0) as u64),
            },
            content_types,
        })
    }

    async fn content_types(&self) -> Result<Vec<String>> {
        let types: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT content_type FROM files ORDER BY content_type ASC")
                .fetch_all(self.db.pool())
                .await?;
        Ok(types)
    }

    async fn storage_paths(&self) -> Result<HashSet<String>> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT DISTINCT storage_path FROM files")
            .fetch_all(self.db.pool())
            .await?;
        Ok(paths.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileKind, NewUpload};

    async fn repo() -> SqliteFileRepository {
        SqliteFileRepository::new(Database::in_memory().await.unwrap())
    }

    fn upload(name: &str, content_type: &str, size: u64) -> NewUpload {
        NewUpload {
            original_filename: name.to_string(),
            content_type: content_type.to_string(),
            declared_size: size,
        }
    }

    fn original(name: &str, content: &[u8]) -> FileRecord {
        FileRecord::new_original(
            &upload(name, "text/plain", content.len() as u64),
            format!("uploads/{}", name),
            ContentHash::of(content),
        )
    }

    #[tokio::test]
    async fn second_original_for_same_hash_loses() {
        let repo = repo().await;
        repo.insert_original(&original("a.txt", b"same")).await.unwrap();

        let err = repo
            .insert_original(&original("b.txt", b"same"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateRaceLost(_)));
    }

    #[tokio::test]
    async fn duplicate_insert_bumps_count_atomically() {
        let repo = repo().await;
        let a = original("a.txt", b"X");
        repo.insert_original(&a).await.unwrap();

        let dup = FileRecord::new_duplicate(&upload("b.txt", "text/plain", 1), &a);
        assert_eq!(repo.insert_duplicate(&dup).await.unwrap(), 2);

        let stored = repo.get(&dup.id).await.unwrap().unwrap();
        assert_eq!(stored, dup);
        assert_eq!(repo.count_duplicates_of(&a.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_of_missing_original_is_rolled_back() {
        let repo = repo().await;
        let a = original("a.txt", b"X");
        let dup = FileRecord::new_duplicate(&upload("b.txt", "text/plain", 1), &a);

        assert!(matches!(
            repo.insert_duplicate(&dup).await,
            Err(AppError::NotFound(_))
        ));
        assert!(repo.get(&dup.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_duplicate_floors_count_at_zero() {
        let repo = repo().await;
        let a = original("a.txt", b"X");
        repo.insert_original(&a).await.unwrap();
        let dup = FileRecord::new_duplicate(&upload("b.txt", "text/plain", 1), &a);
        repo.insert_duplicate(&dup).await.unwrap();

        sqlx::query("UPDATE files SET reference_count = 0 WHERE id = ?")
            .bind(&a.id)
            .execute(repo.db.pool())
            .await
            .unwrap();

        assert!(!repo.delete_duplicate(&dup.id, &a.id).await.unwrap());
        let a_now = repo.get(&a.id).await.unwrap().unwrap();
        assert_eq!(a_now.kind, FileKind::Original { reference_count: 0 });
        assert!(repo.get(&dup.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claimed_original_refuses_new_duplicates() {
        let repo = repo().await;
        let a = original("a.txt", b"X");
        repo.insert_original(&a).await.unwrap();

        assert_eq!(repo.claim_for_delete(&a.id).await.unwrap(), DeleteClaim::Claimed);
        assert!(repo
            .find_original_by_hash(&ContentHash::of(b"X"))
            .await
            .unwrap()
            .is_none());

        let dup = FileRecord::new_duplicate(&upload("b.txt", "text/plain", 1), &a);
        assert!(matches!(
            repo.insert_duplicate(&dup).await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(repo.get(&a.id).await.unwrap().unwrap().reference_count(), Some(1));

        // The claimed row no longer holds the hash.
        let replacement = original("c.txt", b"X");
        repo.insert_original(&replacement).await.unwrap();
        assert!(repo.delete_original(&a.id).await.unwrap());
    }

    #[tokio::test]
    async fn referenced_original_cannot_be_claimed() {
        let repo = repo().await;
        let a = original("a.txt", b"X");
        repo.insert_original(&a).await.unwrap();
        let dup = FileRecord::new_duplicate(&upload("b.txt", "text/plain", 1), &a);
        repo.insert_duplicate(&dup).await.unwrap();

        assert_eq!(
            repo.claim_for_delete(&a.id).await.unwrap(),
            DeleteClaim::Referenced(1)
        );
        assert_eq!(repo.claim_for_delete(&dup.id).await.unwrap(), DeleteClaim::Missing);
        assert_eq!(repo.claim_for_delete("missing").await.unwrap(), DeleteClaim::Missing);

        let again = FileRecord::new_duplicate(&upload("c.txt", "text/plain", 1), &a);
        assert_eq!(repo.insert_duplicate(&again).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn earliest_original_wins_lookup() {
        let repo = repo().await;
        let a = original("a.txt", b"X");
        repo.insert_original(&a).await.unwrap();

        let found = repo
            .find_original_by_hash(&ContentHash::of(b"X"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, a.id);
        assert!(repo
            .find_original_by_hash(&ContentHash::of(b"Y"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let repo = repo().await;
        let small = FileRecord::new_original(
            &upload("Holiday_Photo.JPG", "image/jpeg", 10),
            "uploads/1.jpg".to_string(),
            ContentHash::of(b"1"),
        );
        let large = FileRecord::new_original(
            &upload("notes.txt", "text/plain", 5000),
            "uploads/2.txt".to_string(),
            ContentHash::of(b"2"),
        );
        repo.insert_original(&small).await.unwrap();
        repo.insert_original(&large).await.unwrap();

        let by_type = repo
            .list(
                &FileFilter {
                    content_type: Some("IMAGE/JPEG".to_string()),
                    ..Default::default()
                },
                FileOrdering::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_type.len(), 1);
        assert_eq!(by_type[0].id, small.id);

        let searched = repo
            .list(
                &FileFilter {
                    search: Some("photo".to_string()),
                    ..Default::default()
                },
                FileOrdering::default(),
            )
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);

        let wildcard = repo
            .list(
                &FileFilter {
                    search: Some("%".to_string()),
                    ..Default::default()
                },
                FileOrdering::default(),
            )
            .await
            .unwrap();
        assert!(wildcard.is_empty());

        let by_size = repo
            .list(
                &FileFilter {
                    min_size: Some(100),
                    ..Default::default()
                },
                "-size".parse().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(by_size.len(), 1);
        assert_eq!(by_size[0].id, large.id);

        let ascending = repo
            .list(&FileFilter::default(), "size".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(ascending[0].id, small.id);
    }

    #[tokio::test]
    async fn drift_and_recount() {
        let repo = repo().await;
        let a = original("a.txt", b"X");
        repo.insert_original(&a).await.unwrap();
        for name in ["b.txt", "c.txt"] {
            let dup = FileRecord::new_duplicate(&upload(name, "text/plain", 1), &a);
            repo.insert_duplicate(&dup).await.unwrap();
        }
        assert!(repo.reference_drift().await.unwrap().is_empty());

        sqlx::query("UPDATE files SET reference_count = 9 WHERE id = ?")
            .bind(&a.id)
            .execute(repo.db.pool())
            .await
            .unwrap();

        let drift = repo.reference_drift().await.unwrap();
        assert_eq!(
            drift,
            vec![ReferenceAudit {
                id: a.id.clone(),
                stored: 9,
                actual: 3
            }]
        );
        assert_eq!(repo.recount_references(&a.id).await.unwrap(), 3);
        assert!(repo.reference_drift().await.unwrap().is_empty());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("a_b%"), "%a\\_b\\%%");
        assert_eq!(like_pattern("ABC"), "%abc%");
    }
}
