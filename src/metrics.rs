use std::sync::atomic::{AtomicU64, Ordering};

/// Concurrency watermark: tracks a current value together with its observed peak.
///
/// Used to make the pipeline's gate bounds observable: the file gate and the
/// OCR gate each feed one gauge, and tests assert the peak never exceeds the
/// configured limit.
#[derive(Default)]
pub struct Gauge {
    current: AtomicU64,
    peak: AtomicU64,
}

impl Gauge {
    /// Increment the gauge, returning a guard that decrements on drop.
    pub fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard { gauge: self }
    }

    /// Current in-flight count.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest in-flight count observed since startup.
    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::SeqCst)
    }
}

/// RAII guard decrementing its [`Gauge`] when dropped.
pub struct GaugeGuard<'a> {
    gauge: &'a Gauge,
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Thread-safe counters describing ingestion activity.
#[derive(Default)]
pub struct IndexMetrics {
    documents_indexed: AtomicU64,
    documents_skipped: AtomicU64,
    documents_partial: AtomicU64,
    documents_failed: AtomicU64,
    chunks_indexed: AtomicU64,
    pages_from_cache: AtomicU64,
    pages_local: AtomicU64,
    pages_ocr: AtomicU64,
    ocr_retries: AtomicU64,
    /// Documents currently mid-pipeline (bounded by the file gate).
    pub documents_in_flight: Gauge,
    /// Remote OCR calls currently in flight (bounded by the OCR gate).
    pub ocr_in_flight: Gauge,
}

impl IndexMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fully indexed document and the number of chunks produced for it.
    pub fn record_indexed(&self, chunk_count: u64) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a document skipped because its fingerprint was unchanged.
    pub fn record_skipped(&self) {
        self.documents_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document left partially extracted and resumable.
    pub fn record_partial(&self) {
        self.documents_partial.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document that failed to index.
    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a page served from the page cache.
    pub fn record_page_from_cache(&self) {
        self.pages_from_cache.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a page extracted locally.
    pub fn record_page_local(&self) {
        self.pages_local.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a page extracted via remote OCR.
    pub fn record_page_ocr(&self) {
        self.pages_ocr.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry triggered by an OCR rate limit or transport failure.
    pub fn record_ocr_retry(&self) {
        self.ocr_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            documents_skipped: self.documents_skipped.load(Ordering::Relaxed),
            documents_partial: self.documents_partial.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            pages_from_cache: self.pages_from_cache.load(Ordering::Relaxed),
            pages_local: self.pages_local.load(Ordering::Relaxed),
            pages_ocr: self.pages_ocr.load(Ordering::Relaxed),
            ocr_retries: self.ocr_retries.load(Ordering::Relaxed),
            peak_documents_in_flight: self.documents_in_flight.peak(),
            peak_ocr_in_flight: self.ocr_in_flight.peak(),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents fully indexed since startup.
    pub documents_indexed: u64,
    /// Number of documents skipped as unchanged.
    pub documents_skipped: u64,
    /// Number of documents left partially extracted.
    pub documents_partial: u64,
    /// Number of documents that failed.
    pub documents_failed: u64,
    /// Total chunk count produced across all indexed documents.
    pub chunks_indexed: u64,
    /// Pages answered by the page cache without any extraction work.
    pub pages_from_cache: u64,
    /// Pages extracted with the local extractor.
    pub pages_local: u64,
    /// Pages extracted with the remote OCR service.
    pub pages_ocr: u64,
    /// Retries performed after transient OCR failures.
    pub ocr_retries: u64,
    /// Highest number of documents observed mid-pipeline at once.
    pub peak_documents_in_flight: u64,
    /// Highest number of concurrent remote OCR calls observed.
    pub peak_ocr_in_flight: u64,
}
