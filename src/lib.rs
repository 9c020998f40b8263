#![deny(missing_docs)]

//! Core library for the Docdex document indexing pipeline.

/// Environment-driven configuration management.
pub mod config;
/// Process-wide shared resources with explicit lifecycle.
pub mod context;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Document text extraction: dispatch, PDF orchestration, OCR.
pub mod extract;
/// File change detection via modification time and content hash.
pub mod fingerprint;
/// Structured logging and tracing setup.
pub mod logging;
/// SQLite-backed metadata store and page cache.
pub mod metadata;
/// Ingestion metrics helpers.
pub mod metrics;
/// Document indexing pipeline coordination.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
