//! Shared state handed to every handler.

use crate::services::{document_service::DocumentService, local_store::LocalObjectStore};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Document lifecycle operations.
    pub documents: DocumentService,

    /// Concrete blob store, for presigned downloads and readiness probes.
    pub blobs: Arc<LocalObjectStore>,

    /// Metadata pool, for readiness probes.
    pub db: SqlitePool,

    pub metrics: PrometheusHandle,
}
