//! Object store contract consumed by the document service.
//!
//! Implementations must be safe for concurrent use and must treat deleting
//! an absent key as success.

use crate::models::object::{ObjectInfo, PutOptions};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{io, time::Duration};
use thiserror::Error;

/// A chunked payload flowing into or out of the store.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("declared size {expected} does not match received {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("presigned signature does not match")]
    InvalidSignature,
    #[error("presigned link expired")]
    Expired,
    #[error("object store call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream `body` under `key` and report what was stored.
    async fn put(&self, key: &str, body: ByteStream<'_>, opts: PutOptions)
    -> StoreResult<ObjectInfo>;

    /// Open a stored blob for reading.
    async fn get(&self, key: &str) -> StoreResult<(ByteStream<'static>, ObjectInfo)>;

    /// Remove a blob. Absent keys are not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Time-limited download URL for `key`.
    async fn presign(&self, key: &str, ttl: Duration) -> StoreResult<String>;

    /// Cheap end-to-end probe used by readiness checks.
    async fn health_check(&self) -> StoreResult<()>;
}
