//! `DocumentRepository` contract and its SQLite implementation.
//!
//! Strictly persistence: parameterised queries, no business rules.

use crate::models::document::{Document, Page};
use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("document row not found")]
    NotFound,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Insert a new row and return it as stored.
    async fn create(&self, doc: &Document) -> RepositoryResult<Document>;

    /// `RepositoryError::NotFound` when no row has this id.
    async fn find_by_id(&self, id: &str) -> RepositoryResult<Document>;

    /// Newest first (`created_at DESC, id DESC`) with the total row count.
    async fn list(&self, limit: i64, offset: i64) -> RepositoryResult<Page<Document>>;

    /// Remove a row. Succeeds whether or not the row existed.
    async fn delete(&self, id: &str) -> RepositoryResult<()>;
}

const DOCUMENT_COLUMNS: &str = "id, filename, storage_path, size, content_type, created_at";

#[derive(Clone)]
pub struct SqliteDocumentRepository {
    db: SqlitePool,
}

impl SqliteDocumentRepository {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DocumentRepository for SqliteDocumentRepository {
    async fn create(&self, doc: &Document) -> RepositoryResult<Document> {
        let stored = sqlx::query_as::<_, Document>(&format!(
            "INSERT INTO documents ({DOCUMENT_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {DOCUMENT_COLUMNS}"
        ))
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(&doc.storage_path)
        .bind(doc.size)
        .bind(&doc.content_type)
        .bind(doc.created_at)
        .fetch_one(&self.db)
        .await?;
        Ok(stored)
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<Document> {
        sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound,
            other => RepositoryError::Sqlx(other),
        })
    }

    async fn list(&self, limit: i64, offset: i64) -> RepositoryResult<Page<Document>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.db)
            .await?;

        let items = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             ORDER BY created_at DESC, id DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(Page::new(items, total))
    }

    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
