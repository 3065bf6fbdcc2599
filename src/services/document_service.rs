//! src/services/document_service.rs
//!
//! DocumentService keeps the object store and the metadata repository
//! consistent without a shared transaction:
//! - Upload: store blob, persist row, delete the blob again if the row fails
//! - Delete: remove blob first, then the row
//!
//! A metadata row must never point at a missing blob. The reverse (blob
//! without a row) is only tolerated when the compensating delete itself
//! fails, and is reported as `RollbackFailed`.
//!
//! Errors are returned, not logged; callers map them to responses and log
//! them. The exception is an upload whose caller went away before a
//! `RollbackFailed` could be handed back.

use crate::{
    models::{
        document::{Document, Page},
        object::PutOptions,
    },
    repository::document_repository::{DocumentRepository, RepositoryError},
    services::object_store::{ByteStream, ObjectStore, StoreError},
};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Prefix under which every document blob is stored.
pub const STORAGE_PREFIX: &str = "documents";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
/// Metadata tag recording the client's filename on the stored blob.
pub const ORIGINAL_FILENAME_TAG: &str = "original-filename";

pub const DEFAULT_LIST_LIMIT: i64 = 10;
pub const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(15 * 60);
const MIN_PRESIGN_TTL: Duration = Duration::from_secs(1);
const MAX_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("id is required")]
    IdRequired,
    #[error("content reader is required")]
    ReaderRequired,
    #[error("document not found")]
    NotFound,
    #[error("upload to storage: {0}")]
    UploadFailed(#[source] StoreError),
    #[error("db save failed: {0}")]
    MetadataPersistFailed(#[source] RepositoryError),
    /// Terminal: the blob at `key` may be orphaned and needs manual cleanup.
    #[error("db save failed: {persist}; rollback delete of `{key}` failed: {rollback}")]
    RollbackFailed {
        key: String,
        persist: RepositoryError,
        rollback: StoreError,
    },
    #[error("delete storage: {0}")]
    StorageDeleteFailed(#[source] StoreError),
    #[error("metadata persistence task ended without a result")]
    PersistInterrupted,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Storage(StoreError),
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// A time-limited download link for a document.
#[derive(Debug, Clone)]
pub struct PresignedDocument {
    pub document: Document,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DocumentService {
    store: Arc<dyn ObjectStore>,
    repo: Arc<dyn DocumentRepository>,
    rollback_timeout: Duration,
}

impl DocumentService {
    pub fn new(store: Arc<dyn ObjectStore>, repo: Arc<dyn DocumentRepository>) -> Self {
        Self {
            store,
            repo,
            rollback_timeout: DEFAULT_ROLLBACK_TIMEOUT,
        }
    }

    /// Deadline for the compensating blob delete after a failed insert.
    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout = timeout;
        self
    }

    /// Store `body` as a new document.
    ///
    /// `size` is the declared length, or `None` when unknown. The returned
    /// document carries the size and content type the store reported.
    ///
    /// Once the blob is committed, persistence and compensation run in a
    /// detached task, so dropping this future (timeout, disconnect) cannot
    /// strand a blob between the two steps.
    pub async fn upload(
        &self,
        body: Option<ByteStream<'_>>,
        original_filename: &str,
        content_type: &str,
        size: Option<u64>,
    ) -> DocumentResult<Document> {
        let body = body.ok_or(DocumentError::ReaderRequired)?;

        let filename = format!("{}{}", Uuid::new_v4(), extension_of(original_filename));
        let key = format!("{STORAGE_PREFIX}/{filename}");
        let content_type = if content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };

        let opts = PutOptions {
            size,
            content_type: content_type.to_string(),
            metadata: HashMap::from([(
                ORIGINAL_FILENAME_TAG.to_string(),
                original_filename.to_string(),
            )]),
        };
        let info = self
            .store
            .put(&key, body, opts)
            .await
            .map_err(DocumentError::UploadFailed)?;

        let doc = Document {
            id: Uuid::new_v4().to_string(),
            filename,
            storage_path: info.key,
            size: info.size,
            content_type: info.content_type,
            created_at: Utc::now(),
        };

        let (tx, rx) = oneshot::channel();
        let store = Arc::clone(&self.store);
        let repo = Arc::clone(&self.repo);
        let rollback_timeout = self.rollback_timeout;
        tokio::spawn(async move {
            let outcome = persist_or_compensate(store, repo, doc, key, rollback_timeout).await;
            if let Err(Err(err)) = tx.send(outcome) {
                // Nobody is left to report this to.
                if let DocumentError::RollbackFailed {
                    key,
                    persist,
                    rollback,
                } = &err
                {
                    tracing::error!(
                        key = %key,
                        persist_error = %persist,
                        rollback_error = %rollback,
                        "orphaned blob after cancelled upload; manual cleanup required"
                    );
                }
            }
        });

        rx.await.map_err(|_| DocumentError::PersistInterrupted)?
    }

    /// One page of documents, newest first, plus the total count.
    ///
    /// `limit <= 0` becomes 10 and a negative `offset` becomes 0.
    pub async fn list(&self, limit: i64, offset: i64) -> DocumentResult<Page<Document>> {
        let limit = if limit <= 0 { DEFAULT_LIST_LIMIT } else { limit };
        let offset = offset.max(0);
        Ok(self.repo.list(limit, offset).await?)
    }

    pub async fn get(&self, id: &str) -> DocumentResult<Document> {
        if id.is_empty() {
            return Err(DocumentError::IdRequired);
        }
        self.repo.find_by_id(id).await.map_err(|err| match err {
            RepositoryError::NotFound => DocumentError::NotFound,
            other => DocumentError::Repository(other),
        })
    }

    /// Remove the blob, then the row.
    ///
    /// If the blob delete fails the row is kept so the document stays
    /// findable and the call can be retried.
    pub async fn delete(&self, id: &str) -> DocumentResult<()> {
        let doc = self.get(id).await?;
        self.store
            .delete(&doc.storage_path)
            .await
            .map_err(DocumentError::StorageDeleteFailed)?;
        self.repo.delete(&doc.id).await?;
        Ok(())
    }

    /// Document metadata plus a stream of its payload.
    pub async fn open(&self, id: &str) -> DocumentResult<(Document, ByteStream<'static>)> {
        let doc = self.get(id).await?;
        let (body, _info) = self
            .store
            .get(&doc.storage_path)
            .await
            .map_err(DocumentError::Storage)?;
        Ok((doc, body))
    }

    /// Time-limited download URL. `ttl` is clamped to 1s..=7d.
    pub async fn presign(&self, id: &str, ttl: Duration) -> DocumentResult<PresignedDocument> {
        let doc = self.get(id).await?;
        let ttl = ttl.clamp(MIN_PRESIGN_TTL, MAX_PRESIGN_TTL);
        let url = self
            .store
            .presign(&doc.storage_path, ttl)
            .await
            .map_err(DocumentError::Storage)?;
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
        Ok(PresignedDocument {
            document: doc,
            url,
            expires_at,
        })
    }
}

/// Insert the row; on failure delete the blob under a fresh deadline.
async fn persist_or_compensate(
    store: Arc<dyn ObjectStore>,
    repo: Arc<dyn DocumentRepository>,
    doc: Document,
    key: String,
    rollback_timeout: Duration,
) -> DocumentResult<Document> {
    let persist = match repo.create(&doc).await {
        Ok(stored) => return Ok(stored),
        Err(err) => err,
    };

    let rollback = match tokio::time::timeout(rollback_timeout, store.delete(&key)).await {
        Ok(Ok(())) => return Err(DocumentError::MetadataPersistFailed(persist)),
        Ok(Err(err)) => err,
        Err(_) => StoreError::Timeout(rollback_timeout),
    };

    Err(DocumentError::RollbackFailed {
        key,
        persist,
        rollback,
    })
}

/// Extension of the final path segment including the dot, or `""`.
///
/// Control characters are dropped; everything else is kept as uploaded.
fn extension_of(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match base.rfind('.') {
        Some(idx) => base[idx..].chars().filter(|c| !c.is_control()).collect(),
        None => String::new(),
    }
}
