//! Document indexing pipeline: fingerprinting, extraction, chunking,
//! embedding, and commit coordination.

pub mod chunking;
pub mod locks;
mod service;
pub mod types;

pub use service::{IndexingService, make_doc_id};
pub use types::{FileIndexResult, IndexOutcome, ProcessingError};
