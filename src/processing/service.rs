//! Indexing service coordinating the per-document pipeline.
//!
//! Drives the per-document state machine: fingerprint check, extraction,
//! chunking, embedding, and the swap-commit into the vector store. Many
//! documents run concurrently under the file gate; requests for the same
//! document identity serialize on the keyed lock registry, so a second
//! caller waits for the in-flight attempt and then observes its result
//! through the refreshed fingerprint.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::context::AppContext;
use crate::extract::{ExtractionMethod, FileKind, extract_document, is_supported_file};
use crate::fingerprint::{self, ChangeDecision};
use crate::metadata::{CollectionInfo, DocumentRecord, DocumentStatus};
use crate::metrics::MetricsSnapshot;
use crate::processing::chunking::{chunk_text, determine_chunk_size};
use crate::processing::types::{FileIndexResult, IndexOutcome, ProcessingError};
use crate::qdrant::PointInsert;

/// Deterministic document identity derived from collection and source path.
pub fn make_doc_id(collection: &str, file_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(collection.as_bytes());
    hasher.update(b":");
    hasher.update(file_path.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("doc-{}", &digest[..16])
}

/// Coordinates the full indexing pipeline for files and directories.
///
/// The service borrows every shared resource from the [`AppContext`];
/// construct it once near process start and share it through an `Arc`.
pub struct IndexingService {
    ctx: Arc<AppContext>,
}

impl IndexingService {
    /// Build a service over an initialized application context.
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// The shared context backing this service.
    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Index a single file into `collection`.
    ///
    /// Returns the per-file outcome; `Err` is reserved for metadata-store
    /// failures where no attempt state could be recorded. Extraction,
    /// embedding, and vector-store failures during an attempt are recorded
    /// against the document and reported as [`IndexOutcome::Failed`].
    pub async fn index_file(
        &self,
        path: &Path,
        collection: &str,
        method: ExtractionMethod,
        force: bool,
    ) -> Result<IndexOutcome, ProcessingError> {
        let path = match tokio::fs::canonicalize(path).await {
            Ok(path) => path,
            Err(err) => {
                return Ok(IndexOutcome::Failed {
                    reason: format!("cannot access {}: {err}", path.display()),
                });
            }
        };
        let Some(kind) = FileKind::from_path(&path) else {
            return Ok(IndexOutcome::Failed {
                reason: format!("unsupported file type: {}", path.display()),
            });
        };
        let path_str = path.display().to_string();

        self.ctx.metadata.create_collection(collection).await?;

        let doc_id = make_doc_id(collection, &path_str);
        let lock = self.ctx.locks.lock_for(&doc_id);
        let _doc_guard = lock.lock().await;

        let existing = self.ctx.metadata.document_by_path(&path_str, collection).await?;
        let decision = match fingerprint::detect_change(existing.as_ref(), &path, force) {
            Ok(decision) => decision,
            Err(err) => {
                return Ok(IndexOutcome::Failed {
                    reason: format!("cannot fingerprint {path_str}: {err}"),
                });
            }
        };

        let (mtime_ns, file_hash) = match decision {
            ChangeDecision::Unchanged => {
                tracing::debug!(file = %path_str, "Fingerprint unchanged; skipping");
                self.ctx.metrics.record_skipped();
                return Ok(IndexOutcome::Skipped);
            }
            ChangeDecision::RefreshMtime { mtime_ns } => {
                tracing::debug!(file = %path_str, "Bytes unchanged; refreshing recorded mtime");
                self.ctx
                    .metadata
                    .update_document_mtime(&doc_id, mtime_ns)
                    .await?;
                self.ctx.metrics.record_skipped();
                return Ok(IndexOutcome::Skipped);
            }
            ChangeDecision::Reindex { mtime_ns, file_hash } => (mtime_ns, file_hash),
        };

        // The file gate bounds extraction/chunking/embedding, not the cheap
        // fingerprint check above.
        let Ok(_file_permit) = self.ctx.file_gate.acquire().await else {
            return Ok(IndexOutcome::Failed {
                reason: "file gate closed during shutdown".to_string(),
            });
        };
        let _in_flight = self.ctx.metrics.documents_in_flight.enter();

        let attempt = self
            .run_attempt(
                &path,
                &path_str,
                &doc_id,
                collection,
                kind,
                method,
                mtime_ns,
                &file_hash,
                existing.as_ref(),
            )
            .await;

        match attempt {
            Ok(outcome) => Ok(outcome),
            Err(err @ ProcessingError::Metadata(_)) => Err(err),
            Err(err) => {
                let reason = err.to_string();
                tracing::error!(file = %path_str, error = %reason, "Indexing attempt failed");
                self.ctx
                    .metadata
                    .record_attempt(
                        &doc_id,
                        &path_str,
                        &file_hash,
                        kind.as_str(),
                        collection,
                        DocumentStatus::Failed,
                        Some(&reason),
                    )
                    .await?;
                self.ctx.metrics.record_failed();
                Ok(IndexOutcome::Failed { reason })
            }
        }
    }

    /// One extraction-through-commit attempt for a document.
    ///
    /// Commit order preserves the swap invariant: new points are upserted
    /// under the new content hash, then points under any other hash are
    /// deleted, then the document record moves to `indexed`, then the page
    /// cache namespace is cleared. Old chunks stay queryable until the new
    /// set is visible.
    #[allow(clippy::too_many_arguments)]
    async fn run_attempt(
        &self,
        path: &Path,
        path_str: &str,
        doc_id: &str,
        collection: &str,
        kind: FileKind,
        method: ExtractionMethod,
        mtime_ns: i64,
        file_hash: &str,
        existing: Option<&DocumentRecord>,
    ) -> Result<IndexOutcome, ProcessingError> {
        if let Some(existing) = existing
            && !existing.file_hash.is_empty()
            && existing.file_hash != file_hash
        {
            let removed = self.ctx.metadata.clear_page_cache(&existing.file_hash).await?;
            if removed > 0 {
                tracing::debug!(
                    file = %path_str,
                    stale_hash = %existing.file_hash,
                    entries = removed,
                    "Reclaimed stale page cache namespace"
                );
            }
        }

        let extracted =
            extract_document(path, file_hash, method, &self.ctx.extraction_pipeline()).await?;

        if !extracted.is_complete() {
            tracing::warn!(
                file = %path_str,
                missing = extracted.missing_pages.len(),
                "Document partially extracted; nothing committed, attempt is resumable"
            );
            self.ctx
                .metadata
                .record_attempt(
                    doc_id,
                    path_str,
                    file_hash,
                    kind.as_str(),
                    collection,
                    DocumentStatus::Partial,
                    None,
                )
                .await?;
            self.ctx.metrics.record_partial();
            return Ok(IndexOutcome::PartiallyExtracted {
                missing_pages: extracted.missing_pages,
            });
        }

        let config = &self.ctx.config;
        let chunk_size = determine_chunk_size(
            config.text_splitter_chunk_size,
            config.embedding_provider,
            &config.embedding_model,
        );
        let overlap = config.text_splitter_chunk_overlap.unwrap_or(0);
        let chunks = chunk_text(
            &extracted.content,
            chunk_size,
            overlap,
            config.embedding_provider,
            &config.embedding_model,
        )?;
        if chunks.is_empty() {
            let reason = "document contains no indexable text".to_string();
            self.ctx
                .metadata
                .record_attempt(
                    doc_id,
                    path_str,
                    file_hash,
                    kind.as_str(),
                    collection,
                    DocumentStatus::Failed,
                    Some(&reason),
                )
                .await?;
            self.ctx.metrics.record_failed();
            return Ok(IndexOutcome::Failed { reason });
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.ctx.embedder.generate_embeddings(texts).await?;
        let points: Vec<PointInsert> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, (chunk, vector))| PointInsert {
                text: chunk.text,
                chunk_index,
                token_count: chunk.token_count,
                vector,
            })
            .collect();

        let summary = self
            .ctx
            .qdrant
            .upsert_chunks(
                &config.qdrant_collection_name,
                doc_id,
                collection,
                path_str,
                file_hash,
                points,
            )
            .await?;
        self.ctx
            .qdrant
            .delete_stale_chunks(&config.qdrant_collection_name, doc_id, file_hash)
            .await?;
        self.ctx
            .metadata
            .commit_document(
                doc_id,
                path_str,
                file_hash,
                mtime_ns,
                kind.as_str(),
                collection,
                summary.inserted,
            )
            .await?;
        self.ctx.metadata.clear_page_cache(file_hash).await?;

        self.ctx.metrics.record_indexed(summary.inserted as u64);
        tracing::info!(
            file = %path_str,
            collection,
            chunks = summary.inserted,
            "Document indexed"
        );
        Ok(IndexOutcome::Indexed {
            chunk_count: summary.inserted,
        })
    }

    /// Index a batch of files concurrently (bounded by the file gate).
    pub async fn index_files(
        &self,
        paths: &[PathBuf],
        collection: &str,
        method: ExtractionMethod,
        force: bool,
    ) -> Vec<FileIndexResult> {
        let tasks = paths.iter().map(|path| async move {
            let outcome = match self.index_file(path, collection, method, force).await {
                Ok(outcome) => outcome,
                Err(err) => IndexOutcome::Failed {
                    reason: err.to_string(),
                },
            };
            FileIndexResult {
                file_path: path.display().to_string(),
                outcome,
            }
        });
        futures_util::future::join_all(tasks).await
    }

    /// Index every supported file under a directory.
    pub async fn index_directory(
        &self,
        dir: &Path,
        collection: &str,
        method: ExtractionMethod,
        force: bool,
        recursive: bool,
    ) -> Result<Vec<FileIndexResult>, ProcessingError> {
        if !dir.exists() {
            return Err(ProcessingError::DirectoryNotFound(dir.to_path_buf()));
        }
        if !dir.is_dir() {
            return Err(ProcessingError::NotADirectory(dir.to_path_buf()));
        }

        let mut walker = WalkDir::new(dir);
        if !recursive {
            walker = walker.max_depth(1);
        }
        let mut files: Vec<PathBuf> = walker
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_supported_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(ProcessingError::NoSupportedFiles(dir.to_path_buf()));
        }

        tracing::info!(
            dir = %dir.display(),
            files = files.len(),
            collection,
            recursive,
            "Indexing directory"
        );
        Ok(self.index_files(&files, collection, method, force).await)
    }

    /// Remove a document: its chunks, its metadata record, and its page
    /// cache entries.
    ///
    /// Serializes on the document lock, so removal of a document mid-index
    /// waits for the in-flight attempt; any cache entries that attempt wrote
    /// are reclaimed here.
    pub async fn remove_document(
        &self,
        path: &Path,
        collection: &str,
    ) -> Result<bool, ProcessingError> {
        // The file may already be gone from disk; fall back to the path as
        // given when it cannot be canonicalized.
        let path_str = tokio::fs::canonicalize(path)
            .await
            .map(|canonical| canonical.display().to_string())
            .unwrap_or_else(|_| path.display().to_string());

        let doc_id = make_doc_id(collection, &path_str);
        let lock = self.ctx.locks.lock_for(&doc_id);
        let _doc_guard = lock.lock().await;

        let Some(record) = self.ctx.metadata.document_by_path(&path_str, collection).await? else {
            return Ok(false);
        };

        self.ctx
            .qdrant
            .delete_document(&self.ctx.config.qdrant_collection_name, &record.doc_id)
            .await?;
        self.ctx.metadata.remove_document(&record.doc_id).await?;
        self.ctx.metadata.clear_page_cache(&record.file_hash).await?;

        tracing::info!(file = %path_str, collection, "Document removed");
        Ok(true)
    }

    /// Create a collection, returning `false` when it already exists.
    pub async fn create_collection(&self, name: &str) -> Result<bool, ProcessingError> {
        Ok(self.ctx.metadata.create_collection(name).await?)
    }

    /// Delete a collection and cascade to its documents' chunks and cache
    /// entries. Returns `false` when the collection does not exist.
    pub async fn delete_collection(&self, name: &str) -> Result<bool, ProcessingError> {
        if !self.ctx.metadata.collection_exists(name).await? {
            return Ok(false);
        }

        let documents = self.ctx.metadata.list_documents(Some(name)).await?;
        self.ctx
            .qdrant
            .delete_collection_chunks(&self.ctx.config.qdrant_collection_name, name)
            .await?;
        for document in &documents {
            self.ctx.metadata.clear_page_cache(&document.file_hash).await?;
        }
        let deleted = self.ctx.metadata.delete_collection(name).await?;

        tracing::info!(
            collection = name,
            documents = documents.len(),
            "Collection deleted"
        );
        Ok(deleted)
    }

    /// Enumerate collections with their document counts.
    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>, ProcessingError> {
        Ok(self.ctx.metadata.list_collections().await?)
    }

    /// Enumerate documents, optionally scoped to a collection.
    pub async fn list_documents(
        &self,
        collection: Option<&str>,
    ) -> Result<Vec<DocumentRecord>, ProcessingError> {
        Ok(self.ctx.metadata.list_documents(collection).await?)
    }

    /// Current ingestion metrics.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }
}
