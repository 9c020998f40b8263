//! Document text extraction.
//!
//! Dispatches by file kind: plaintext and DOCX convert in one shot, while
//! PDFs run through the resumable per-page orchestrator in [`pdf`]. The
//! extraction backend per page is a closed strategy selection keyed by
//! [`ExtractionMethod`]; the set of backends is small and known at compile
//! time.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::metadata::{MetadataError, MetadataStore};
use crate::metrics::IndexMetrics;

/// DOCX conversion.
pub mod docx;
/// Remote OCR client.
pub mod ocr;
/// Resumable per-page PDF extraction.
pub mod pdf;

/// Errors raised while extracting a document's text.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The file extension maps to no supported kind.
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    /// Reading the source file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The PDF could not be parsed at all (whole-file, permanent).
    #[error("malformed PDF: {0}")]
    Pdf(String),
    /// The DOCX archive or XML was malformed (permanent).
    #[error("malformed DOCX: {0}")]
    Docx(String),
    /// The page cache rejected or failed an operation.
    #[error("page cache error: {0}")]
    Cache(#[from] MetadataError),
    /// A page requires OCR but no remote OCR client is configured.
    #[error("remote OCR is not configured; set OCR_API_KEY to extract scanned pages")]
    OcrUnavailable,
    /// Every page of the document failed to extract.
    #[error("no pages could be extracted")]
    AllPagesFailed,
    /// A spawned page task aborted unexpectedly.
    #[error("page task aborted: {0}")]
    PageTask(String),
}

/// Extraction backend selection for PDF pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtractionMethod {
    /// Classify each page and pick local extraction or remote OCR.
    #[default]
    Auto,
    /// Local text-layer extraction only; scanned pages come out empty.
    Local,
    /// Remote OCR for every page.
    Remote,
}

impl FromStr for ExtractionMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            _ => Err(()),
        }
    }
}

/// Supported source file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// PDF document, extracted page by page.
    Pdf,
    /// Word document (OOXML).
    Docx,
    /// Plain UTF-8 text (txt, md, rst, ...).
    Plaintext,
}

impl FileKind {
    /// Stable string form stored in document metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Plaintext => "plaintext",
        }
    }

    /// Map a path's extension to a supported kind.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" | "md" | "markdown" | "rst" | "text" => Some(Self::Plaintext),
            _ => None,
        }
    }
}

/// Whether the pipeline knows how to extract this file.
pub fn is_supported_file(path: &Path) -> bool {
    FileKind::from_path(path).is_some()
}

/// Normalized text produced for one document.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// Assembled document text, pages in ascending index order.
    pub content: String,
    /// Kind of the source file.
    pub file_kind: FileKind,
    /// Page count for paged formats.
    pub page_count: Option<usize>,
    /// Zero-based indexes of pages that produced no text this attempt.
    pub missing_pages: Vec<usize>,
}

impl ExtractedDocument {
    /// Whether every page produced text (trivially true for unpaged formats).
    pub fn is_complete(&self) -> bool {
        self.missing_pages.is_empty()
    }
}

/// Shared collaborators handed to the per-page PDF orchestrator.
///
/// All handles are cheap clones of process-wide resources owned by the
/// application context.
#[derive(Clone)]
pub struct ExtractionPipeline {
    /// Durable page cache (and the rest of the metadata store).
    pub cache: MetadataStore,
    /// Page classification strategy.
    pub classifier: Arc<dyn pdf::PageClassifier>,
    /// Remote OCR client, when configured.
    pub ocr: Option<Arc<dyn ocr::RemoteOcr>>,
    /// Global bound on in-flight remote OCR calls.
    pub ocr_gate: Arc<Semaphore>,
    /// Ingestion metrics registry.
    pub metrics: Arc<IndexMetrics>,
    /// Retries allowed per page after a transient OCR failure.
    pub ocr_max_retries: u32,
}

/// Extract the normalized text of `path`, using the page cache for PDFs.
///
/// `file_hash` is the content hash namespacing the document's cache entries;
/// the caller computes it once during change detection.
pub async fn extract_document(
    path: &Path,
    file_hash: &str,
    method: ExtractionMethod,
    pipeline: &ExtractionPipeline,
) -> Result<ExtractedDocument, ExtractError> {
    let kind = FileKind::from_path(path).ok_or_else(|| {
        ExtractError::UnsupportedType(
            path.extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or_default()
                .to_string(),
        )
    })?;

    match kind {
        FileKind::Pdf => pdf::extract_pdf(path, file_hash, method, pipeline).await,
        FileKind::Docx => {
            tracing::info!(file = %display_name(path), "Extracting DOCX");
            let content = docx::extract_docx(path).await?;
            Ok(ExtractedDocument {
                content,
                file_kind: FileKind::Docx,
                page_count: None,
                missing_pages: Vec::new(),
            })
        }
        FileKind::Plaintext => {
            tracing::info!(file = %display_name(path), "Extracting plaintext");
            let content = extract_plaintext(path).await?;
            Ok(ExtractedDocument {
                content,
                file_kind: FileKind::Plaintext,
                page_count: None,
                missing_pages: Vec::new(),
            })
        }
    }
}

/// Read a plaintext file, replacing invalid UTF-8 rather than failing.
async fn extract_plaintext(path: &Path) -> Result<String, ExtractError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kinds_map_by_extension() {
        assert_eq!(FileKind::from_path(Path::new("a/report.PDF")), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_path(Path::new("notes.docx")), Some(FileKind::Docx));
        assert_eq!(FileKind::from_path(Path::new("readme.md")), Some(FileKind::Plaintext));
        assert_eq!(FileKind::from_path(Path::new("data.csv")), None);
        assert_eq!(FileKind::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn method_parses_known_values() {
        assert_eq!("auto".parse::<ExtractionMethod>(), Ok(ExtractionMethod::Auto));
        assert_eq!("Remote".parse::<ExtractionMethod>(), Ok(ExtractionMethod::Remote));
        assert!("azure".parse::<ExtractionMethod>().is_err());
    }

    #[tokio::test]
    async fn plaintext_replaces_invalid_utf8() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"ok \xff bytes").expect("write");
        let text = extract_plaintext(&path).await.expect("extract");
        assert!(text.starts_with("ok "));
        assert!(text.contains('\u{fffd}'));
    }
}
