//! Object store request/response shapes.

use std::collections::HashMap;

/// Options for a single `put`.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Exact byte count when known up front; `None` streams an unsized body.
    pub size: Option<u64>,

    /// MIME type recorded alongside the blob.
    pub content_type: String,

    /// Free-form tags stored with the blob (e.g. the original filename).
    pub metadata: HashMap<String, String>,
}

/// What the object store knows about a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    /// Hex MD5 of the payload.
    pub etag: String,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}
