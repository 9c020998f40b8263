//! Keyed per-document lock registry.
//!
//! Serializes indexing attempts per document identity without a global lock:
//! concurrent requests for the same document wait on the same async mutex,
//! while different documents proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry of per-document async locks.
#[derive(Default)]
pub struct DocumentLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentLocks {
    /// Fetch (creating on first use) the lock handle for a document identity.
    pub fn lock_for(&self, doc_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("document lock registry poisoned");
        map.entry(doc_id.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_document_serializes() {
        let locks = Arc::new(DocumentLocks::default());
        let lock = locks.lock_for("doc-1");
        let guard = lock.lock().await;

        let second = locks.lock_for("doc-1");
        assert!(second.try_lock().is_err());

        drop(guard);
        assert!(second.try_lock().is_ok());
    }

    #[tokio::test]
    async fn different_documents_are_independent() {
        let locks = DocumentLocks::default();
        let first = locks.lock_for("doc-1");
        let _held = first.lock().await;

        let other = locks.lock_for("doc-2");
        assert!(other.try_lock().is_ok());
    }
}
