//! Orchestrator-seam tests: resumable per-page PDF extraction driven through
//! scripted page sources, classifiers, and OCR backends.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use docdex::extract::ocr::{OcrError, RemoteOcr};
use docdex::extract::pdf::{PageClass, PageClassifier, PdfPageSource, extract_pages};
use docdex::extract::{ExtractError, ExtractionMethod, ExtractionPipeline};
use docdex::metadata::{MetadataStore, PageMethod};
use docdex::metrics::IndexMetrics;

struct ScriptedSource {
    pages: Vec<String>,
}

impl ScriptedSource {
    fn with_pages(count: usize) -> Self {
        Self {
            pages: (0..count).map(|index| format!("text of page {index}")).collect(),
        }
    }
}

impl PdfPageSource for ScriptedSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, index: usize) -> Result<String, ExtractError> {
        Ok(self.pages[index].clone())
    }

    fn page_bytes(&self, index: usize) -> Result<Vec<u8>, ExtractError> {
        // Stamp the page index into the bytes so the scripted OCR backend
        // can tell pages apart.
        Ok(format!("page-{index}").into_bytes())
    }
}

struct ScriptedClassifier {
    verdicts: Vec<PageClass>,
}

impl PageClassifier for ScriptedClassifier {
    fn classify(
        &self,
        _source: &dyn PdfPageSource,
        index: usize,
    ) -> Result<PageClass, ExtractError> {
        Ok(self.verdicts[index])
    }
}

#[derive(Clone)]
enum OcrStep {
    Text(String),
    RateLimited(Option<Duration>),
    Fail(String),
}

/// OCR backend replaying a per-page script; unscripted calls succeed with a
/// deterministic page marker. Counts every call it receives.
struct ScriptedOcr {
    scripts: Mutex<HashMap<usize, VecDeque<OcrStep>>>,
    calls: AtomicUsize,
    delay_per_page: Vec<Duration>,
}

impl ScriptedOcr {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            delay_per_page: Vec::new(),
        }
    }

    fn script(self, page: usize, steps: Vec<OcrStep>) -> Self {
        self.scripts
            .lock()
            .expect("script lock")
            .insert(page, steps.into());
        self
    }

    fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delay_per_page = delays;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn page_index(page_pdf: &[u8]) -> usize {
    std::str::from_utf8(page_pdf)
        .ok()
        .and_then(|text| text.strip_prefix("page-"))
        .and_then(|index| index.parse().ok())
        .expect("page bytes carry an index stamp")
}

#[async_trait]
impl RemoteOcr for ScriptedOcr {
    async fn extract_page(&self, page_pdf: &[u8]) -> Result<String, OcrError> {
        let index = page_index(page_pdf);
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay_per_page.get(index).copied() {
            tokio::time::sleep(delay).await;
        }

        let step = self
            .scripts
            .lock()
            .expect("script lock")
            .get_mut(&index)
            .and_then(VecDeque::pop_front);
        match step {
            None => Ok(format!("ocr of page {index}")),
            Some(OcrStep::Text(text)) => Ok(text),
            Some(OcrStep::RateLimited(retry_after)) => Err(OcrError::RateLimited { retry_after }),
            Some(OcrStep::Fail(message)) => Err(OcrError::Extraction(message)),
        }
    }
}

async fn cache_store() -> (tempfile::TempDir, MetadataStore) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = MetadataStore::connect(&dir.path().join("metadata.db"))
        .await
        .expect("connect");
    (dir, store)
}

fn pipeline(
    cache: MetadataStore,
    classifier: ScriptedClassifier,
    ocr: Arc<ScriptedOcr>,
    ocr_gate: usize,
    ocr_max_retries: u32,
) -> ExtractionPipeline {
    ExtractionPipeline {
        cache,
        classifier: Arc::new(classifier),
        ocr: Some(ocr as Arc<dyn RemoteOcr>),
        ocr_gate: Arc::new(Semaphore::new(ocr_gate)),
        metrics: Arc::new(IndexMetrics::new()),
        ocr_max_retries,
    }
}

fn all_scans(count: usize) -> ScriptedClassifier {
    ScriptedClassifier {
        verdicts: vec![PageClass::RequiresOcr; count],
    }
}

#[tokio::test]
async fn mixed_document_assembles_in_page_order() {
    // Page 0 has a text layer; pages 1 and 2 are scans, with page 2
    // rate-limited twice before succeeding.
    let (_dir, store) = cache_store().await;
    let source = ScriptedSource::with_pages(3);
    let classifier = ScriptedClassifier {
        verdicts: vec![
            PageClass::LocalText,
            PageClass::RequiresOcr,
            PageClass::RequiresOcr,
        ],
    };
    let ocr = Arc::new(
        ScriptedOcr::new()
            .script(1, vec![OcrStep::Text("ocr of page 1".into())])
            .script(
                2,
                vec![
                    OcrStep::RateLimited(Some(Duration::from_millis(5))),
                    OcrStep::RateLimited(Some(Duration::from_millis(5))),
                    OcrStep::Text("ocr of page 2".into()),
                ],
            ),
    );

    let pipeline = pipeline(store.clone(), classifier, ocr.clone(), 4, 2);
    let extracted = extract_pages(&source, "report.pdf", "hash-a", ExtractionMethod::Auto, &pipeline)
        .await
        .expect("extraction");

    assert!(extracted.is_complete());
    assert_eq!(extracted.page_count, Some(3));
    assert_eq!(
        extracted.content,
        "text of page 0\n\nocr of page 1\n\nocr of page 2"
    );
    // One local entry plus two OCR entries, nothing more.
    assert_eq!(store.count_cached_pages("hash-a").await.expect("count"), 3);

    let snapshot = pipeline.metrics.snapshot();
    assert_eq!(snapshot.pages_local, 1);
    assert_eq!(snapshot.pages_ocr, 2);
    assert_eq!(snapshot.ocr_retries, 2);
}

#[tokio::test]
async fn second_attempt_extracts_only_the_missing_pages() {
    let (_dir, store) = cache_store().await;
    let source = ScriptedSource::with_pages(10);

    // Pages 3 and 7 stay rate-limited past the retry budget on the first
    // attempt; every other page succeeds.
    let exhaust = || {
        vec![
            OcrStep::RateLimited(Some(Duration::from_millis(2))),
            OcrStep::RateLimited(Some(Duration::from_millis(2))),
            OcrStep::RateLimited(Some(Duration::from_millis(2))),
        ]
    };
    let first_ocr = Arc::new(ScriptedOcr::new().script(3, exhaust()).script(7, exhaust()));
    let first = pipeline(store.clone(), all_scans(10), first_ocr, 4, 2);
    let extracted = extract_pages(&source, "big.pdf", "hash-b", ExtractionMethod::Remote, &first)
        .await
        .expect("first attempt");

    assert_eq!(extracted.missing_pages, vec![3, 7]);
    // Transient failures are not cached; the eight successes are.
    assert_eq!(store.count_cached_pages("hash-b").await.expect("count"), 8);

    let second_ocr = Arc::new(ScriptedOcr::new());
    let second = pipeline(store.clone(), all_scans(10), second_ocr.clone(), 4, 2);
    let resumed = extract_pages(&source, "big.pdf", "hash-b", ExtractionMethod::Remote, &second)
        .await
        .expect("second attempt");

    assert!(resumed.is_complete());
    assert_eq!(second_ocr.calls(), 2);
    let snapshot = second.metrics.snapshot();
    assert_eq!(snapshot.pages_from_cache, 8);
    assert_eq!(snapshot.pages_ocr, 2);

    let expected: Vec<String> = (0..10).map(|index| format!("ocr of page {index}")).collect();
    assert_eq!(resumed.content, expected.join("\n\n"));
}

#[tokio::test]
async fn assembly_order_is_independent_of_completion_order() {
    let (_dir, store) = cache_store().await;
    let source = ScriptedSource::with_pages(4);

    // Earlier pages take longer, so completion order is 3, 2, 1, 0.
    let ocr = Arc::new(ScriptedOcr::new().with_delays(vec![
        Duration::from_millis(60),
        Duration::from_millis(40),
        Duration::from_millis(20),
        Duration::ZERO,
    ]));
    let pipeline = pipeline(store, all_scans(4), ocr, 4, 0);
    let extracted = extract_pages(&source, "shuffled.pdf", "hash-c", ExtractionMethod::Remote, &pipeline)
        .await
        .expect("extraction");

    assert_eq!(
        extracted.content,
        "ocr of page 0\n\nocr of page 1\n\nocr of page 2\n\nocr of page 3"
    );
}

#[tokio::test]
async fn permanent_failure_is_recorded_and_never_reattempted() {
    let (_dir, store) = cache_store().await;
    let source = ScriptedSource::with_pages(2);

    let first_ocr = Arc::new(
        ScriptedOcr::new().script(1, vec![OcrStep::Fail("corrupt page stream".into())]),
    );
    let first = pipeline(store.clone(), all_scans(2), first_ocr, 2, 2);
    let extracted = extract_pages(&source, "corrupt.pdf", "hash-d", ExtractionMethod::Remote, &first)
        .await
        .expect("first attempt");

    assert_eq!(extracted.missing_pages, vec![1]);
    let sentinel = store
        .cached_page("hash-d", 1)
        .await
        .expect("lookup")
        .expect("sentinel present");
    assert_eq!(sentinel.method, PageMethod::Failed);

    // Resumption serves the sentinel from the cache; the backend is not
    // called again for the dead page.
    let second_ocr = Arc::new(ScriptedOcr::new());
    let second = pipeline(store.clone(), all_scans(2), second_ocr.clone(), 2, 2);
    let resumed = extract_pages(&source, "corrupt.pdf", "hash-d", ExtractionMethod::Remote, &second)
        .await
        .expect("second attempt");

    assert_eq!(second_ocr.calls(), 0);
    assert_eq!(resumed.missing_pages, vec![1]);
}

#[tokio::test]
async fn every_page_failing_is_a_document_error() {
    let (_dir, store) = cache_store().await;
    let source = ScriptedSource::with_pages(1);
    let ocr = Arc::new(ScriptedOcr::new().script(0, vec![OcrStep::Fail("unreadable".into())]));
    let pipeline = pipeline(store, all_scans(1), ocr, 1, 0);

    let err = extract_pages(&source, "dead.pdf", "hash-e", ExtractionMethod::Remote, &pipeline)
        .await
        .expect_err("document error expected");
    assert!(matches!(err, ExtractError::AllPagesFailed));
}

#[tokio::test]
async fn ocr_gate_bounds_in_flight_calls() {
    let (_dir, store) = cache_store().await;
    let source = ScriptedSource::with_pages(6);
    let ocr = Arc::new(ScriptedOcr::new().with_delays(vec![Duration::from_millis(10); 6]));

    let pipeline = pipeline(store, all_scans(6), ocr, 1, 0);
    let extracted = extract_pages(&source, "wide.pdf", "hash-f", ExtractionMethod::Remote, &pipeline)
        .await
        .expect("extraction");

    assert!(extracted.is_complete());
    let snapshot = pipeline.metrics.snapshot();
    assert_eq!(snapshot.pages_ocr, 6);
    assert_eq!(snapshot.peak_ocr_in_flight, 1);
}

#[tokio::test]
async fn cached_pages_skip_classification_and_extraction() {
    let (_dir, store) = cache_store().await;
    store
        .cache_page("hash-g", 0, "previously extracted", PageMethod::Remote)
        .await
        .expect("seed cache");

    let source = ScriptedSource::with_pages(1);
    let ocr = Arc::new(ScriptedOcr::new());
    let pipeline = pipeline(store, all_scans(1), ocr.clone(), 1, 0);
    let extracted = extract_pages(&source, "cached.pdf", "hash-g", ExtractionMethod::Remote, &pipeline)
        .await
        .expect("extraction");

    assert_eq!(ocr.calls(), 0);
    assert_eq!(extracted.content, "previously extracted");
}
