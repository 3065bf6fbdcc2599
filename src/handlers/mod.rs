pub mod blob_handlers;
pub mod document_handlers;
pub mod health_handlers;
pub mod metrics_handlers;
