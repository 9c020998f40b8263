//! Core data types and error definitions for the indexing pipeline.

use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::EmbeddingClientError;
use crate::extract::ExtractError;
use crate::metadata::MetadataError;
use crate::qdrant::QdrantError;

/// Errors produced while turning raw text into token-bounded chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Errors emitted by the document indexing pipeline.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Chunking step failed to segment the document.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed to produce vectors for the input text.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Qdrant interaction failed during ingestion or cleanup.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Metadata store interaction failed.
    #[error("Metadata store failed: {0}")]
    Metadata(#[from] MetadataError),
    /// Extraction failed at the whole-file level.
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractError),
    /// The requested directory does not exist.
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    /// The requested path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
    /// A directory walk found nothing the pipeline can extract.
    #[error("No supported files found in {0}")]
    NoSupportedFiles(PathBuf),
}

/// Per-file outcome of an indexing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Chunks and vectors were committed.
    Indexed {
        /// Number of chunks stored for the document.
        chunk_count: usize,
    },
    /// The fingerprint was unchanged; no work was performed.
    Skipped,
    /// Extraction left gaps; the document is resumable and nothing was committed.
    PartiallyExtracted {
        /// Zero-based indexes of pages still missing text.
        missing_pages: Vec<usize>,
    },
    /// The attempt failed; nothing was committed.
    Failed {
        /// Human-readable failure reason.
        reason: String,
    },
}

impl IndexOutcome {
    /// Whether the outcome terminates the document in a good state.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Indexed { .. } | Self::Skipped)
    }
}

impl std::fmt::Display for IndexOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Indexed { chunk_count } => write!(f, "indexed ({chunk_count} chunks)"),
            Self::Skipped => write!(f, "skipped (unchanged)"),
            Self::PartiallyExtracted { missing_pages } => {
                write!(f, "partially extracted ({} pages missing)", missing_pages.len())
            }
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Outcome of one file paired with its source path.
#[derive(Debug, Clone)]
pub struct FileIndexResult {
    /// Path as supplied by the caller.
    pub file_path: String,
    /// What happened to the file.
    pub outcome: IndexOutcome,
}
