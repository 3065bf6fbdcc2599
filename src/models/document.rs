//! Represents an uploaded document and paginated listings of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata for a single stored document.
///
/// The payload bytes live in the object store under `storage_path`; this
/// record is what the metadata store persists and what the API returns.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Document {
    /// Unique identifier (UUID v4, hyphenated). Never reused.
    pub id: String,

    /// Generated storage-facing name: a fresh UUID plus the original extension.
    pub filename: String,

    /// Object store key holding the payload.
    pub storage_path: String,

    /// Size in bytes, as reported by the object store.
    pub size: i64,

    /// MIME type, as reported by the object store.
    pub content_type: String,

    /// When the metadata row was created (UTC).
    pub created_at: DateTime<Utc>,
}

/// One page of a listing plus the total number of rows available.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    #[serde(rename = "data")]
    pub items: Vec<T>,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64) -> Self {
        Self { items, total }
    }
}
