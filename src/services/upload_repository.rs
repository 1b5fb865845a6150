//! SQLite-backed metadata store for [`Upload`] records.
//!
//! Only keyed operations are exposed: create, find by id, update the offset
//! after an append, and delete by id. Timestamps are assigned here.

use crate::models::upload::{NewUpload, Upload};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;

const SELECT_COLUMNS: &str = "id, mime_type, content_length, content_offset, \
     last_uploaded_chunk_number, original_name, fingerprint, is_partial, metadata, \
     created_at, updated_at";

/// Embedded schema, applied by `--migrate` and by tests.
const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone)]
pub struct UploadRepository {
    /// Shared SQLite connection pool.
    db: Arc<SqlitePool>,
}

impl UploadRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new record and return it as stored.
    pub async fn insert(&self, upload: &NewUpload) -> Result<Upload, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, Upload>(&format!(
            "INSERT INTO uploads (
                id, mime_type, content_length, content_offset, last_uploaded_chunk_number,
                original_name, fingerprint, is_partial, metadata, created_at, updated_at
             ) VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?)
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(upload.id)
        .bind(&upload.mime_type)
        .bind(upload.content_length)
        .bind(upload.content_offset)
        .bind(&upload.original_name)
        .bind(&upload.fingerprint)
        .bind(upload.partial_status)
        .bind(&upload.metadata)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Upload>, sqlx::Error> {
        sqlx::query_as::<_, Upload>(&format!(
            "SELECT {SELECT_COLUMNS} FROM uploads WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// Fetch several records, preserving the order of `ids`.
    ///
    /// Returns `Err(missing_id)` wrapped in `Ok` for the first id without a record.
    pub async fn find_all_by_ids(&self, ids: &[i64]) -> Result<Result<Vec<Upload>, i64>, sqlx::Error> {
        let mut uploads = Vec::with_capacity(ids.len());
        for id in ids {
            match self.find_by_id(*id).await? {
                Some(upload) => uploads.push(upload),
                None => return Ok(Err(*id)),
            }
        }
        Ok(Ok(uploads))
    }

    /// Account for one committed append of `bytes_written` bytes.
    ///
    /// The increment happens inside a single statement so the stored offset is
    /// never computed from a stale read. Returns `None` if the record vanished.
    pub async fn record_chunk(
        &self,
        id: i64,
        bytes_written: i64,
    ) -> Result<Option<Upload>, sqlx::Error> {
        sqlx::query_as::<_, Upload>(&format!(
            "UPDATE uploads
             SET content_offset = content_offset + ?,
                 last_uploaded_chunk_number = last_uploaded_chunk_number + 1,
                 updated_at = ?
             WHERE id = ?
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(bytes_written)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&*self.db)
        .await
    }

    /// Delete a record; returns whether a row was removed.
    pub async fn delete_by_id(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Connectivity probe for readiness checks.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        if value == 1 {
            Ok(())
        } else {
            Err(sqlx::Error::Protocol(format!("unexpected result: {}", value)))
        }
    }

    #[cfg(test)]
    pub async fn backdate(&self, id: i64, created_at: chrono::DateTime<Utc>) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE uploads SET created_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

/// Apply the embedded schema statement by statement.
pub async fn run_migrations(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(strip_comments)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(&stmt).execute(db).await?;
    }
    Ok(())
}

fn strip_comments(statement: &str) -> String {
    statement
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
pub(crate) async fn test_pool() -> Arc<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_upload(id: i64, length: i64) -> NewUpload {
        NewUpload {
            id,
            mime_type: "text/plain".into(),
            content_length: length,
            content_offset: 0,
            original_name: "notes.txt".into(),
            fingerprint: "fp-1".into(),
            partial_status: true,
            metadata: "filename bm90ZXMudHh0".into(),
        }
    }

    #[tokio::test]
    async fn insert_then_find() {
        let repo = UploadRepository::new(test_pool().await);
        let stored = repo.insert(&new_upload(42, 100)).await.unwrap();

        assert_eq!(stored.id, 42);
        assert_eq!(stored.content_offset, 0);
        assert_eq!(stored.last_uploaded_chunk_number, 0);
        assert!(stored.partial_status);

        let found = repo.find_by_id(42).await.unwrap().unwrap();
        assert_eq!(found, stored);
        assert!(repo.find_by_id(43).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let repo = UploadRepository::new(test_pool().await);
        repo.insert(&new_upload(1, 10)).await.unwrap();
        assert!(repo.insert(&new_upload(1, 10)).await.is_err());
    }

    #[tokio::test]
    async fn record_chunk_increments_offset_and_chunk_number() {
        let repo = UploadRepository::new(test_pool().await);
        repo.insert(&new_upload(7, 100)).await.unwrap();

        let after_first = repo.record_chunk(7, 40).await.unwrap().unwrap();
        assert_eq!(after_first.content_offset, 40);
        assert_eq!(after_first.last_uploaded_chunk_number, 1);

        let after_second = repo.record_chunk(7, 60).await.unwrap().unwrap();
        assert_eq!(after_second.content_offset, 100);
        assert_eq!(after_second.last_uploaded_chunk_number, 2);
        assert!(after_second.updated_at >= after_first.updated_at);

        assert!(repo.record_chunk(8, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offset_beyond_length_violates_schema() {
        let repo = UploadRepository::new(test_pool().await);
        repo.insert(&new_upload(3, 10)).await.unwrap();
        assert!(repo.record_chunk(3, 11).await.is_err());
        assert_eq!(repo.find_by_id(3).await.unwrap().unwrap().content_offset, 0);
    }

    #[tokio::test]
    async fn find_all_preserves_order_and_reports_missing() {
        let repo = UploadRepository::new(test_pool().await);
        repo.insert(&new_upload(1, 5)).await.unwrap();
        repo.insert(&new_upload(2, 6)).await.unwrap();

        let found = repo.find_all_by_ids(&[2, 1]).await.unwrap().unwrap();
        assert_eq!(found.iter().map(|u| u.id).collect::<Vec<_>>(), vec![2, 1]);

        assert_eq!(repo.find_all_by_ids(&[1, 9, 2]).await.unwrap(), Err(9));
    }

    #[tokio::test]
    async fn delete_reports_whether_row_existed() {
        let repo = UploadRepository::new(test_pool().await);
        repo.insert(&new_upload(5, 5)).await.unwrap();

        assert!(repo.delete_by_id(5).await.unwrap());
        assert!(!repo.delete_by_id(5).await.unwrap());
        assert!(repo.find_by_id(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ping_succeeds() {
        let repo = UploadRepository::new(test_pool().await);
        repo.ping().await.unwrap();
    }
}
