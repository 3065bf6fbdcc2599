//! Service layer: document lifecycle orchestration and the object store
//! collaborators it drives.

pub mod document_service;
pub mod local_store;
#[cfg(test)]
pub mod memory;
pub mod object_store;
