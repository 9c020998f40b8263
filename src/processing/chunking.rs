//! Chunk-size heuristics and semantic chunking helpers.
//!
//! Chunk boundaries come from `semchunk-rs`; token budgets derive from the
//! embedding model's context window and can be overridden via
//! `TEXT_SPLITTER_CHUNK_SIZE`. An optional sliding token overlap keeps spans
//! around boundaries visible to retrieval. Token counting prefers
//! `tiktoken-rs` encodings and falls back to whitespace counting for models
//! without a known tokenizer (common for Ollama aliases).

use semchunk_rs::Chunker;
use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, r50k_base};

use super::types::ChunkingError;
use crate::config::EmbeddingProvider;

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

const MIN_AUTOMATIC_CHUNK_SIZE: usize = 256;
const MAX_AUTOMATIC_CHUNK_SIZE: usize = 1024;

/// One retrieval-sized span of normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Chunk text.
    pub text: String,
    /// Token count measured with the active counter.
    pub token_count: usize,
}

/// Determine the chunk size for a document, respecting an explicit override.
///
/// Without an override the budget derives from the model context window
/// divided by four, clamped into `[256, 1024]`.
pub(crate) fn determine_chunk_size(
    override_size: Option<usize>,
    provider: EmbeddingProvider,
    model: &str,
) -> usize {
    if let Some(explicit) = override_size {
        return explicit.max(1);
    }

    let window = embedding_context_window(provider, model);
    (window / 4)
        .max(1)
        .clamp(MIN_AUTOMATIC_CHUNK_SIZE, MAX_AUTOMATIC_CHUNK_SIZE)
}

fn embedding_context_window(provider: EmbeddingProvider, model: &str) -> usize {
    match provider {
        EmbeddingProvider::Ollama => {
            let normalized = model.to_lowercase();
            match normalized.as_str() {
                "nomic-embed-text" | "mxbai-embed-large" | "mxbai-embed-large-v1" => 8192,
                value if value.contains("all-minilm") => 512,
                value if value.contains("e5-large") => 4096,
                _ => {
                    tracing::trace!(model, "Using default Ollama context window estimate");
                    4096
                }
            }
        }
        EmbeddingProvider::Hash => 2048,
    }
}

/// Chunk text into token-bounded semantic segments.
///
/// - `chunk_size` is a hard upper bound on the token count per segment.
/// - `overlap` prefixes each chunk after the first with the tail of its
///   predecessor, trimmed so the budget still holds.
///
/// Returns an empty vector when the input text is all whitespace.
pub(crate) fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    provider: EmbeddingProvider,
    model: &str,
) -> Result<Vec<TextChunk>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let counter = build_token_counter(provider, model);
    let chunks = chunk_with_counter(text, chunk_size, overlap, &counter);
    Ok(chunks
        .into_iter()
        .map(|text| {
            let token_count = counter.as_ref()(&text);
            TextChunk { text, token_count }
        })
        .collect())
}

/// Build a token counter for the given provider/model.
///
/// Falls back to whitespace counting when no tiktoken encoding matches; the
/// fallback is logged once per call site at `debug` to keep ingestion flowing.
fn build_token_counter(provider: EmbeddingProvider, model: &str) -> TokenCounter {
    if provider == EmbeddingProvider::Hash {
        return whitespace_counter();
    }
    match resolve_encoding(model) {
        Some(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        None => {
            tracing::debug!(model, "No tokenizer encoding found; counting whitespace tokens");
            whitespace_counter()
        }
    }
}

fn resolve_encoding(model: &str) -> Option<CoreBPE> {
    if let Ok(encoding) = get_bpe_from_model(model) {
        return Some(encoding);
    }
    match model {
        "cl100k_base" => cl100k_base().ok(),
        "o200k_base" => o200k_base().ok(),
        "p50k_base" => p50k_base().ok(),
        "r50k_base" | "gpt2" => r50k_base().ok(),
        _ => None,
    }
}

fn whitespace_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() { 1 } else { tokens }
    })
}

fn chunk_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    counter: &TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base = chunker.chunk(text);

    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 || base.len() < 2 {
        return base;
    }

    let mut out = Vec::with_capacity(base.len());
    for (index, current) in base.iter().enumerate() {
        if index == 0 {
            out.push(current.clone());
            continue;
        }
        let tail = word_tail(&base[index - 1], effective_overlap, counter);
        let combined = if tail.is_empty() {
            current.clone()
        } else {
            format!("{tail} {current}")
        };
        out.push(trim_front_to_budget(combined, chunk_size, counter));
    }
    out
}

/// Longest word-boundary suffix of `text` that stays within `token_limit`.
fn word_tail(text: &str, token_limit: usize, counter: &TokenCounter) -> String {
    if token_limit == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut start = words.len();
    while start > 0 {
        let candidate = words[start - 1..].join(" ");
        if counter.as_ref()(&candidate) > token_limit {
            break;
        }
        start -= 1;
    }
    words[start..].join(" ")
}

/// Drop leading words until the text fits the token budget.
fn trim_front_to_budget(text: String, budget: usize, counter: &TokenCounter) -> String {
    if counter.as_ref()(&text) <= budget {
        return text;
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    for start in 1..words.len() {
        let candidate = words[start..].join(" ");
        if counter.as_ref()(&candidate) <= budget {
            return candidate;
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_text_respects_chunk_size_whitespace_counter() {
        let chunks = chunk_text(
            "one two three four five",
            2,
            0,
            EmbeddingProvider::Hash,
            "test",
        )
        .expect("chunking");
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["one two", "three four", "five"]);
        assert!(chunks.iter().all(|chunk| chunk.token_count <= 2));
    }

    #[test]
    fn chunk_text_handles_empty_input() {
        let chunks = chunk_text("  \n ", 4, 0, EmbeddingProvider::Hash, "test").expect("chunking");
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_text_applies_overlap_within_budget() {
        let chunks = chunk_text(
            "one two three four five",
            3,
            1,
            EmbeddingProvider::Hash,
            "test",
        )
        .expect("chunking");
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["one two three", "three four five"]);
        assert!(chunks.iter().all(|chunk| chunk.token_count <= 3));
    }

    #[test]
    fn chunk_text_rejects_zero_chunk_size() {
        let error = chunk_text("hello", 0, 0, EmbeddingProvider::Hash, "test").unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn determine_chunk_size_prefers_override() {
        assert_eq!(
            determine_chunk_size(Some(42), EmbeddingProvider::Ollama, "nomic-embed-text"),
            42
        );
    }

    #[test]
    fn determine_chunk_size_handles_common_ollama_models() {
        assert_eq!(
            determine_chunk_size(None, EmbeddingProvider::Ollama, "nomic-embed-text"),
            1024
        );
        assert_eq!(
            determine_chunk_size(None, EmbeddingProvider::Ollama, "all-minilm-l6-v2"),
            256
        );
    }

    #[test]
    fn determine_chunk_size_clamps_hash_provider() {
        assert_eq!(determine_chunk_size(None, EmbeddingProvider::Hash, "test"), 512);
    }

    #[test]
    fn word_tail_takes_longest_fitting_suffix() {
        let counter = whitespace_counter();
        assert_eq!(word_tail("a b c d", 2, &counter), "c d");
        assert_eq!(word_tail("a b c d", 10, &counter), "a b c d");
        assert_eq!(word_tail("a b c d", 0, &counter), "");
    }
}
