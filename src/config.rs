use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Docdex pipeline.
///
/// Owned by [`crate::context::AppContext`]; constructed once near process
/// start and threaded through every pipeline invocation rather than read
/// from ambient globals.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Name of the Qdrant points collection used for chunk storage.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Optional override for the Ollama endpoint.
    pub ollama_url: Option<String>,
    /// Optional override for the automatic chunk size selection.
    pub text_splitter_chunk_size: Option<usize>,
    /// Optional sliding token overlap between adjacent chunks.
    pub text_splitter_chunk_overlap: Option<usize>,
    /// Directory holding the metadata database.
    pub data_dir: PathBuf,
    /// How many documents may be mid-pipeline at once.
    pub max_concurrent_files: usize,
    /// How many remote OCR calls may be in flight across all documents.
    pub max_concurrent_ocr: usize,
    /// Optional override for the remote OCR endpoint.
    pub ocr_api_url: Option<String>,
    /// API key for the remote OCR service; unset disables remote OCR.
    pub ocr_api_key: Option<String>,
    /// Model identifier used by the remote OCR service.
    pub ocr_model: String,
    /// Retries allowed per page after a transient OCR failure.
    pub ocr_max_retries: u32,
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic hash-projection embeddings (offline, tests).
    Hash,
}

const DEFAULT_DATA_DIR: &str = "docdex-data";
const DEFAULT_MAX_CONCURRENT_FILES: usize = 32;
const DEFAULT_MAX_CONCURRENT_OCR: usize = 128;
const DEFAULT_OCR_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_OCR_MAX_RETRIES: u32 = 2;

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_collection_name: load_env("QDRANT_COLLECTION_NAME")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            ollama_url: load_env_optional("OLLAMA_URL"),
            text_splitter_chunk_size: parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?,
            text_splitter_chunk_overlap: parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?,
            data_dir: load_env_optional("DOCDEX_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            max_concurrent_files: parse_optional("DOCDEX_MAX_CONCURRENT_FILES")?
                .unwrap_or(DEFAULT_MAX_CONCURRENT_FILES),
            max_concurrent_ocr: parse_optional("DOCDEX_MAX_CONCURRENT_OCR")?
                .unwrap_or(DEFAULT_MAX_CONCURRENT_OCR),
            ocr_api_url: load_env_optional("OCR_API_URL"),
            ocr_api_key: load_env_optional("OCR_API_KEY"),
            ocr_model: load_env_optional("OCR_MODEL")
                .unwrap_or_else(|| DEFAULT_OCR_MODEL.to_string()),
            ocr_max_retries: parse_optional("OCR_MAX_RETRIES")?.unwrap_or(DEFAULT_OCR_MAX_RETRIES),
        })
    }

    /// Path of the SQLite metadata database inside the data directory.
    pub fn metadata_db_path(&self) -> PathBuf {
        self.data_dir.join("metadata.db")
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}
