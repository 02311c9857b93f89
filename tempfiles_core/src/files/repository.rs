use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::error::{AppError, Result};
use super::models::FileRecord;

/// The metadata ledger. Implementations must be safe to call from many
/// tasks at once; each call observes a consistent snapshot.
#[async_trait]
pub trait FileRepositoryTrait: Send + Sync {
    async fn insert(&self, record: &FileRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<FileRecord>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list_expired(&self, as_of: DateTime<Utc>) -> Result<Vec<FileRecord>>;
    async fn list_ids(&self) -> Result<Vec<String>>;
    async fn count(&self) -> Result<u64>;
}

#[derive(Clone)]
pub struct FileRepository {
    pool: SqlitePool,
}

impl FileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                original_name TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_expires_at ON files (expires_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| AppError::Database(format!("Invalid timestamp in ledger: {}", millis)))
}

fn record_from_row(row: &SqliteRow) -> Result<FileRecord> {
    Ok(FileRecord {
        id: row.try_get("id")?,
        original_name: row.try_get("original_name")?,
        content_type: row.try_get("content_type")?,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
        created_at: from_millis(row.try_get("created_at")?)?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
    })
}

#[async_trait]
impl FileRepositoryTrait for FileRepository {
    async fn insert(&self, record: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (id, original_name, content_type, size_bytes, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&record.id)
        .bind(&record.original_name)
        .bind(&record.content_type)
        .bind(record.size_bytes as i64)
        .bind(to_millis(record.created_at))
        .bind(to_millis(record.expires_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT id, original_name, content_type, size_bytes, created_at, expires_at FROM files WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let rows_affected = sqlx::query("DELETE FROM files WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows_affected == 0 {
            return Err(AppError::NotFound(format!("File {} not found", id)));
        }

        Ok(())
    }

    async fn list_expired(&self, as_of: DateTime<Utc>) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, original_name, content_type, size_bytes, created_at, expires_at
            FROM files
            WHERE expires_at <= ?1
            ORDER BY expires_at ASC
            "#,
        )
        .bind(to_millis(as_of))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM files")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(AppError::from))
            .collect()
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM files")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get::<i64, _>("count")? as u64)
    }
}
