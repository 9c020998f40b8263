//! Process-wide shared resources with explicit lifecycle.
//!
//! Every handle the pipeline shares across documents lives here: the
//! configuration, the metadata store, the vector store client, the embedding
//! and OCR clients, the two concurrency gates, the keyed document locks, and
//! the metrics registry. The context is constructed once near process start,
//! passed by reference into every pipeline invocation, and torn down with
//! [`AppContext::close`].

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::{Config, ConfigError};
use crate::embedding::{EmbeddingClient, EmbeddingClientError, build_embedding_client};
use crate::extract::ExtractionPipeline;
use crate::extract::ocr::{GeminiOcrClient, OcrError, RemoteOcr};
use crate::extract::pdf::{PageClassifier, TextLayerClassifier};
use crate::metadata::{MetadataError, MetadataStore};
use crate::metrics::IndexMetrics;
use crate::processing::locks::DocumentLocks;
use crate::qdrant::{QdrantError, QdrantService};

const META_EMBEDDING_MODEL: &str = "embedding_model";
const META_EMBEDDING_DIMENSION: &str = "embedding_dimension";

/// Errors raised while bringing the shared context up.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Configuration was missing or invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The metadata store could not be opened or prepared.
    #[error("metadata store error: {0}")]
    Metadata(#[from] MetadataError),
    /// The vector store could not be reached or prepared.
    #[error("vector store error: {0}")]
    Qdrant(#[from] QdrantError),
    /// The embedding client could not be constructed.
    #[error("embedding client error: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// The remote OCR client could not be constructed.
    #[error("OCR client error: {0}")]
    Ocr(#[from] OcrError),
    /// The configured embedding model diverges from the one the index was
    /// built with; existing vectors are invalid for the new model.
    #[error(
        "embedding model pin mismatch: index was built with {recorded}, configured {configured}; \
         a full reindex is required (clear the data directory and the vector collection)"
    )]
    ModelPinMismatch {
        /// Model pin recorded in the metadata store.
        recorded: String,
        /// Model pin derived from the current configuration.
        configured: String,
    },
}

/// Process-wide shared state for the indexing pipeline.
pub struct AppContext {
    /// Loaded runtime configuration.
    pub config: Config,
    /// Durable metadata store and page cache.
    pub metadata: MetadataStore,
    /// Vector store client.
    pub qdrant: QdrantService,
    /// Embedding backend selected by configuration.
    pub embedder: Box<dyn EmbeddingClient + Send + Sync>,
    /// Page classification strategy for PDF extraction.
    pub classifier: Arc<dyn PageClassifier>,
    /// Remote OCR client; `None` when no API key is configured.
    pub ocr: Option<Arc<dyn RemoteOcr>>,
    /// Bounds how many documents are mid-pipeline at once.
    pub file_gate: Arc<Semaphore>,
    /// Bounds remote OCR calls in flight across all documents.
    pub ocr_gate: Arc<Semaphore>,
    /// Keyed per-document lock registry.
    pub locks: DocumentLocks,
    /// Ingestion metrics registry.
    pub metrics: Arc<IndexMetrics>,
}

impl AppContext {
    /// Build the full shared context from configuration.
    ///
    /// Opens the metadata store (applying the schema), verifies the embedding
    /// model pin, ensures the Qdrant collection and its payload indexes, and
    /// constructs the embedding and OCR clients. Fails fast on any of these:
    /// a context that initialized is a context the pipeline can run against.
    pub async fn initialize(config: Config) -> Result<Self, ContextError> {
        let metadata = MetadataStore::connect(&config.metadata_db_path()).await?;
        verify_model_pin(&metadata, &config.embedding_model, config.embedding_dimension).await?;

        let qdrant = QdrantService::new(&config)?;
        qdrant
            .create_collection_if_not_exists(
                &config.qdrant_collection_name,
                config.embedding_dimension as u64,
            )
            .await?;
        qdrant
            .ensure_payload_indexes(&config.qdrant_collection_name)
            .await?;

        let embedder = build_embedding_client(&config)?;
        let ocr = GeminiOcrClient::from_config(&config)?
            .map(|client| Arc::new(client) as Arc<dyn RemoteOcr>);
        if ocr.is_none() {
            tracing::info!("Remote OCR disabled; scanned PDF pages will not be extracted");
        }

        tracing::info!(
            data_dir = %config.data_dir.display(),
            max_concurrent_files = config.max_concurrent_files,
            max_concurrent_ocr = config.max_concurrent_ocr,
            "Application context initialized"
        );

        Ok(Self {
            file_gate: Arc::new(Semaphore::new(config.max_concurrent_files)),
            ocr_gate: Arc::new(Semaphore::new(config.max_concurrent_ocr)),
            metadata,
            qdrant,
            embedder,
            classifier: Arc::new(TextLayerClassifier::new()),
            ocr,
            locks: DocumentLocks::default(),
            metrics: Arc::new(IndexMetrics::new()),
            config,
        })
    }

    /// Collaborator bundle handed to the per-page PDF orchestrator.
    pub fn extraction_pipeline(&self) -> ExtractionPipeline {
        ExtractionPipeline {
            cache: self.metadata.clone(),
            classifier: self.classifier.clone(),
            ocr: self.ocr.clone(),
            ocr_gate: self.ocr_gate.clone(),
            metrics: self.metrics.clone(),
            ocr_max_retries: self.config.ocr_max_retries,
        }
    }

    /// Tear down process-wide resources.
    pub async fn close(&self) {
        self.metadata.close().await;
    }
}

/// Check (recording on first run) the embedding model pin.
///
/// Vectors already in the index were produced by one specific model and
/// dimension; silently switching models would mix incompatible vector spaces.
async fn verify_model_pin(
    metadata: &MetadataStore,
    model: &str,
    dimension: usize,
) -> Result<(), ContextError> {
    let configured = format!("{model}:{dimension}");
    let recorded_model = metadata.get_meta(META_EMBEDDING_MODEL).await?;
    let recorded_dimension = metadata.get_meta(META_EMBEDDING_DIMENSION).await?;

    match (recorded_model, recorded_dimension) {
        (Some(recorded_model), Some(recorded_dimension)) => {
            let recorded = format!("{recorded_model}:{recorded_dimension}");
            if recorded != configured {
                return Err(ContextError::ModelPinMismatch {
                    recorded,
                    configured,
                });
            }
            Ok(())
        }
        _ => {
            metadata.set_meta(META_EMBEDDING_MODEL, model).await?;
            metadata
                .set_meta(META_EMBEDDING_DIMENSION, &dimension.to_string())
                .await?;
            tracing::debug!(model, dimension, "Recorded embedding model pin");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = MetadataStore::connect(&dir.path().join("metadata.db"))
            .await
            .expect("connect");
        (dir, store)
    }

    #[tokio::test]
    async fn first_run_records_the_pin() {
        let (_dir, store) = store().await;
        verify_model_pin(&store, "nomic-embed-text", 768)
            .await
            .expect("first run");
        assert_eq!(
            store.get_meta(META_EMBEDDING_MODEL).await.expect("get").as_deref(),
            Some("nomic-embed-text")
        );
        assert_eq!(
            store
                .get_meta(META_EMBEDDING_DIMENSION)
                .await
                .expect("get")
                .as_deref(),
            Some("768")
        );
    }

    #[tokio::test]
    async fn matching_pin_passes() {
        let (_dir, store) = store().await;
        verify_model_pin(&store, "nomic-embed-text", 768)
            .await
            .expect("first run");
        verify_model_pin(&store, "nomic-embed-text", 768)
            .await
            .expect("second run");
    }

    #[tokio::test]
    async fn changed_model_demands_a_full_reindex() {
        let (_dir, store) = store().await;
        verify_model_pin(&store, "nomic-embed-text", 768)
            .await
            .expect("first run");
        let err = verify_model_pin(&store, "mxbai-embed-large", 1024)
            .await
            .expect_err("mismatch expected");
        assert!(matches!(err, ContextError::ModelPinMismatch { .. }));
    }
}
