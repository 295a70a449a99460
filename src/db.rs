use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database, migrated and ready.
    ///
    /// Held on a single connection that never expires; every connection to
    /// `:memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(60))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                storage_path TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                content_type TEXT NOT NULL DEFAULT '',
                size INTEGER NOT NULL,
                actual_size INTEGER NOT NULL DEFAULT 0,
                content_hash TEXT NOT NULL DEFAULT '',
                is_duplicate INTEGER NOT NULL DEFAULT 0,
                reference_id TEXT,
                reference_count INTEGER NOT NULL DEFAULT 1,
                uploaded_at TEXT NOT NULL,
                pending_delete INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (reference_id) REFERENCES files(id),
                CHECK ((is_duplicate = 0 AND reference_id IS NULL)
                    OR (is_duplicate = 1 AND reference_id IS NOT NULL)),
                CHECK (reference_count >= 0)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Add columns introduced after the first schema (ignore errors if they exist)
        let _ = sqlx::query(
            "ALTER TABLE files ADD COLUMN pending_delete INTEGER NOT NULL DEFAULT 0",
        )
        .execute(&self.pool)
        .await;

        // One live original per content hash; the ingest race resolves here.
        // Originals claimed for deletion no longer hold their hash.
        sqlx::query("DROP INDEX IF EXISTS idx_files_original_hash")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_files_live_original_hash ON files(content_hash) WHERE is_duplicate = 0 AND pending_delete = 0 AND content_hash <> ''",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_content_hash ON files(content_hash)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_reference_id ON files(reference_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_uploaded_at ON files(uploaded_at)")
            .execute(&self.pool)
            .await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }
}
