//! Resumable per-page PDF extraction.
//!
//! Every page consults the durable page cache first, so an interrupted
//! extraction resumes with zero repeated OCR cost. Cache misses are
//! classified and routed to either the local text-layer extractor or the
//! remote OCR service; OCR pages run as bounded concurrent tasks behind the
//! process-wide OCR gate. Final assembly orders pages strictly by index,
//! independent of completion order, so the assembled text is deterministic
//! under any scheduling.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::{
    ExtractError, ExtractedDocument, ExtractionMethod, ExtractionPipeline, FileKind, display_name,
};
use crate::extract::ocr::RemoteOcr;
use crate::metadata::{MetadataError, MetadataStore, PageMethod};
use crate::metrics::IndexMetrics;

/// Minimum extractable text-layer characters for a page to skip OCR.
const MIN_TEXT_LAYER_CHARS: usize = 50;

/// Base delay for exponential backoff when the backend gives no retry hint.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Read-only view of an opened PDF used by the orchestrator.
///
/// Implemented on `lopdf` for real documents; tests substitute in-memory
/// sources to inject delays and failures.
pub trait PdfPageSource: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self) -> usize;
    /// Local text-layer extraction for one page (zero-based index).
    fn page_text(&self, index: usize) -> Result<String, ExtractError>;
    /// The page carved out as a standalone single-page PDF, for OCR upload.
    fn page_bytes(&self, index: usize) -> Result<Vec<u8>, ExtractError>;
}

/// Classifier verdict for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageClass {
    /// The page has a usable text layer; extract locally.
    LocalText,
    /// The page is scanned or unreadable locally; send to OCR.
    RequiresOcr,
}

/// Decides whether a page is locally extractable.
///
/// Must be deterministic for the same page content; the pipeline treats the
/// verdict as an opaque boolean.
pub trait PageClassifier: Send + Sync {
    /// Classify one page of `source`.
    fn classify(&self, source: &dyn PdfPageSource, index: usize)
    -> Result<PageClass, ExtractError>;
}

/// Default classifier: pages whose text layer falls below a character floor
/// are treated as scans.
pub struct TextLayerClassifier {
    min_chars: usize,
}

impl TextLayerClassifier {
    /// Classifier with the default character floor.
    pub fn new() -> Self {
        Self {
            min_chars: MIN_TEXT_LAYER_CHARS,
        }
    }
}

impl Default for TextLayerClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PageClassifier for TextLayerClassifier {
    fn classify(
        &self,
        source: &dyn PdfPageSource,
        index: usize,
    ) -> Result<PageClass, ExtractError> {
        let text = source.page_text(index)?;
        if text.trim().chars().count() < self.min_chars {
            Ok(PageClass::RequiresOcr)
        } else {
            Ok(PageClass::LocalText)
        }
    }
}

/// PDF document opened through `lopdf`.
pub struct LopdfSource {
    doc: lopdf::Document,
    page_numbers: Vec<u32>,
}

impl LopdfSource {
    /// Load a PDF from disk.
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        let doc = lopdf::Document::load(path).map_err(|err| ExtractError::Pdf(err.to_string()))?;
        let page_numbers = doc.get_pages().keys().copied().collect();
        Ok(Self { doc, page_numbers })
    }

    fn page_number(&self, index: usize) -> Result<u32, ExtractError> {
        self.page_numbers
            .get(index)
            .copied()
            .ok_or_else(|| ExtractError::Pdf(format!("page index {index} out of range")))
    }
}

impl PdfPageSource for LopdfSource {
    fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    fn page_text(&self, index: usize) -> Result<String, ExtractError> {
        let number = self.page_number(index)?;
        self.doc
            .extract_text(&[number])
            .map_err(|err| ExtractError::Pdf(err.to_string()))
    }

    fn page_bytes(&self, index: usize) -> Result<Vec<u8>, ExtractError> {
        let keep = self.page_number(index)?;
        let mut single = self.doc.clone();
        let delete: Vec<u32> = self
            .page_numbers
            .iter()
            .copied()
            .filter(|number| *number != keep)
            .collect();
        if !delete.is_empty() {
            single.delete_pages(&delete);
        }
        let mut buffer = Vec::new();
        single
            .save_to(&mut buffer)
            .map_err(|err| ExtractError::Pdf(err.to_string()))?;
        Ok(buffer)
    }
}

enum PageSlot {
    Ready(String),
    Pending(JoinHandle<Result<PageTaskOutcome, MetadataError>>),
    Gap(PageGap),
}

#[derive(Clone, Copy)]
enum PageGap {
    Transient,
    Permanent,
}

enum PageTaskOutcome {
    Text(String),
    Transient,
    Permanent,
}

/// Extract a PDF from disk through the per-page orchestrator.
pub async fn extract_pdf(
    path: &Path,
    file_hash: &str,
    method: ExtractionMethod,
    pipeline: &ExtractionPipeline,
) -> Result<ExtractedDocument, ExtractError> {
    let source = LopdfSource::open(path)?;
    extract_pages(&source, &display_name(path), file_hash, method, pipeline).await
}

/// Produce the full normalized text of an opened PDF, reusing cached page
/// results and only doing new work for missing pages.
pub async fn extract_pages(
    source: &dyn PdfPageSource,
    file_name: &str,
    file_hash: &str,
    method: ExtractionMethod,
    pipeline: &ExtractionPipeline,
) -> Result<ExtractedDocument, ExtractError> {
    let page_count = source.page_count();
    tracing::info!(file = file_name, pages = page_count, method = ?method, "Extracting PDF");

    if method == ExtractionMethod::Remote && pipeline.ocr.is_none() {
        return Err(ExtractError::OcrUnavailable);
    }

    let mut slots: Vec<PageSlot> = Vec::with_capacity(page_count);
    let mut cached_pages = 0usize;
    let mut local_pages = 0usize;
    let mut ocr_pages = 0usize;

    for index in 0..page_count {
        if let Some(entry) = pipeline.cache.cached_page(file_hash, index).await? {
            match entry.method {
                PageMethod::Failed => {
                    tracing::debug!(
                        file = file_name,
                        page = index + 1,
                        "Skipping page with recorded permanent failure"
                    );
                    slots.push(PageSlot::Gap(PageGap::Permanent));
                }
                _ => {
                    tracing::debug!(file = file_name, page = index + 1, "Page served from cache");
                    pipeline.metrics.record_page_from_cache();
                    cached_pages += 1;
                    slots.push(PageSlot::Ready(entry.content));
                }
            }
            continue;
        }

        let class = match method {
            ExtractionMethod::Local => Ok(PageClass::LocalText),
            ExtractionMethod::Remote => Ok(PageClass::RequiresOcr),
            ExtractionMethod::Auto => {
                if pipeline.ocr.is_some() {
                    pipeline.classifier.classify(source, index)
                } else {
                    // Without an OCR backend every page goes through the
                    // local extractor, scans included.
                    Ok(PageClass::LocalText)
                }
            }
        };

        let class = match class {
            Ok(class) => class,
            Err(err) => {
                tracing::warn!(
                    file = file_name,
                    page = index + 1,
                    error = %err,
                    "Page classification failed; marking page permanently failed"
                );
                pipeline
                    .cache
                    .cache_page(file_hash, index, "", PageMethod::Failed)
                    .await?;
                slots.push(PageSlot::Gap(PageGap::Permanent));
                continue;
            }
        };

        match class {
            PageClass::LocalText => match source.page_text(index) {
                Ok(text) => {
                    tracing::debug!(file = file_name, page = index + 1, "Page extracted locally");
                    pipeline
                        .cache
                        .cache_page(file_hash, index, &text, PageMethod::Local)
                        .await?;
                    pipeline.metrics.record_page_local();
                    local_pages += 1;
                    slots.push(PageSlot::Ready(text));
                }
                Err(err) => {
                    tracing::warn!(
                        file = file_name,
                        page = index + 1,
                        error = %err,
                        "Local extraction failed; marking page permanently failed"
                    );
                    pipeline
                        .cache
                        .cache_page(file_hash, index, "", PageMethod::Failed)
                        .await?;
                    slots.push(PageSlot::Gap(PageGap::Permanent));
                }
            },
            PageClass::RequiresOcr => {
                let Some(ocr) = pipeline.ocr.clone() else {
                    return Err(ExtractError::OcrUnavailable);
                };
                match source.page_bytes(index) {
                    Ok(bytes) => {
                        tracing::debug!(file = file_name, page = index + 1, "Page queued for OCR");
                        ocr_pages += 1;
                        slots.push(PageSlot::Pending(tokio::spawn(ocr_page(
                            ocr,
                            pipeline.cache.clone(),
                            pipeline.ocr_gate.clone(),
                            pipeline.metrics.clone(),
                            file_hash.to_string(),
                            file_name.to_string(),
                            index,
                            bytes,
                            pipeline.ocr_max_retries,
                        ))));
                    }
                    Err(err) => {
                        tracing::warn!(
                            file = file_name,
                            page = index + 1,
                            error = %err,
                            "Could not carve page for OCR; marking page permanently failed"
                        );
                        pipeline
                            .cache
                            .cache_page(file_hash, index, "", PageMethod::Failed)
                            .await?;
                        slots.push(PageSlot::Gap(PageGap::Permanent));
                    }
                }
            }
        }
    }

    // Assembly: strictly ascending page index regardless of completion order.
    let mut texts: Vec<String> = Vec::with_capacity(page_count);
    let mut missing_pages: Vec<usize> = Vec::new();
    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            PageSlot::Ready(text) => texts.push(text),
            PageSlot::Gap(gap) => {
                record_gap(file_name, index, gap, &mut missing_pages);
                texts.push(String::new());
            }
            PageSlot::Pending(handle) => match handle.await {
                Err(join_err) => return Err(ExtractError::PageTask(join_err.to_string())),
                Ok(outcome) => match outcome? {
                    PageTaskOutcome::Text(text) => texts.push(text),
                    PageTaskOutcome::Transient => {
                        record_gap(file_name, index, PageGap::Transient, &mut missing_pages);
                        texts.push(String::new());
                    }
                    PageTaskOutcome::Permanent => {
                        record_gap(file_name, index, PageGap::Permanent, &mut missing_pages);
                        texts.push(String::new());
                    }
                },
            },
        }
    }

    if page_count > 0 && missing_pages.len() == page_count {
        return Err(ExtractError::AllPagesFailed);
    }

    tracing::info!(
        file = file_name,
        pages = page_count,
        cached = cached_pages,
        local = local_pages,
        ocr = ocr_pages,
        missing = missing_pages.len(),
        "Extraction complete"
    );

    Ok(ExtractedDocument {
        content: texts.join("\n\n"),
        file_kind: FileKind::Pdf,
        page_count: Some(page_count),
        missing_pages,
    })
}

fn record_gap(file_name: &str, index: usize, gap: PageGap, missing_pages: &mut Vec<usize>) {
    match gap {
        PageGap::Transient => tracing::warn!(
            file = file_name,
            page = index + 1,
            "Page missing after transient failures; document will be resumable"
        ),
        PageGap::Permanent => tracing::warn!(
            file = file_name,
            page = index + 1,
            "Page permanently failed; leaving a gap in the assembled text"
        ),
    }
    missing_pages.push(index);
}

/// One OCR page task: acquire the global OCR gate per attempt, releasing the
/// slot while waiting out rate-limit delays so backoff does not starve other
/// pages' concurrency budget.
#[allow(clippy::too_many_arguments)]
async fn ocr_page(
    ocr: Arc<dyn RemoteOcr>,
    cache: MetadataStore,
    gate: Arc<Semaphore>,
    metrics: Arc<IndexMetrics>,
    file_hash: String,
    file_name: String,
    page_index: usize,
    page_pdf: Vec<u8>,
    max_retries: u32,
) -> Result<PageTaskOutcome, MetadataError> {
    let mut attempt: u32 = 0;
    loop {
        let Ok(permit) = gate.acquire().await else {
            return Ok(PageTaskOutcome::Transient);
        };
        let result = {
            let _in_flight = metrics.ocr_in_flight.enter();
            ocr.extract_page(&page_pdf).await
        };
        drop(permit);

        match result {
            Ok(text) => {
                cache
                    .cache_page(&file_hash, page_index, &text, PageMethod::Remote)
                    .await?;
                metrics.record_page_ocr();
                return Ok(PageTaskOutcome::Text(text));
            }
            Err(err) if err.is_transient() => {
                if attempt >= max_retries {
                    tracing::warn!(
                        file = %file_name,
                        page = page_index + 1,
                        error = %err,
                        "OCR retries exhausted; deferring page to a later attempt"
                    );
                    return Ok(PageTaskOutcome::Transient);
                }
                attempt += 1;
                metrics.record_ocr_retry();
                let delay = err.retry_after().unwrap_or_else(|| backoff_delay(attempt));
                tracing::warn!(
                    file = %file_name,
                    page = page_index + 1,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "OCR transiently failed; waiting before retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::warn!(
                    file = %file_name,
                    page = page_index + 1,
                    error = %err,
                    "OCR failed permanently; recording failure sentinel"
                );
                cache
                    .cache_page(&file_hash, page_index, "", PageMethod::Failed)
                    .await?;
                return Ok(PageTaskOutcome::Permanent);
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    BACKOFF_BASE.saturating_mul(1 << exponent)
}
