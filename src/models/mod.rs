//! Core data models for the document API.
//!
//! `Document` maps to the `documents` table via `sqlx::FromRow` and
//! serializes as JSON via `serde`. The object types describe blobs held by
//! the object store.

pub mod document;
pub mod object;
