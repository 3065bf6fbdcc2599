//! Metadata persistence for documents.

pub mod document_repository;
