//! Filter construction for scoped point operations.
//!
//! Deletion and counting are always filtered: by document, by document with
//! a stale content hash (the swap-commit path), or by logical collection
//! (the cascade path).

use serde_json::{Value, json};

/// All points belonging to one document.
pub fn document_filter(doc_id: &str) -> Value {
    json!({
        "must": [
            { "key": "doc_id", "match": { "value": doc_id } }
        ]
    })
}

/// Points of a document whose content hash differs from `current_hash`.
///
/// Used after committing a fresh chunk set: the new points are already
/// visible, and this filter removes only the superseded generation, so old
/// chunks stay queryable right up to the swap.
pub fn stale_chunks_filter(doc_id: &str, current_hash: &str) -> Value {
    json!({
        "must": [
            { "key": "doc_id", "match": { "value": doc_id } }
        ],
        "must_not": [
            { "key": "file_hash", "match": { "value": current_hash } }
        ]
    })
}

/// All points belonging to one logical collection.
pub fn collection_filter(collection: &str) -> Value {
    json!({
        "must": [
            { "key": "collection", "match": { "value": collection } }
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_filter_matches_doc_id() {
        let filter = document_filter("doc-1");
        assert_eq!(filter["must"][0]["key"], "doc_id");
        assert_eq!(filter["must"][0]["match"]["value"], "doc-1");
    }

    #[test]
    fn stale_filter_excludes_current_hash() {
        let filter = stale_chunks_filter("doc-1", "hash-new");
        assert_eq!(filter["must"][0]["match"]["value"], "doc-1");
        assert_eq!(filter["must_not"][0]["key"], "file_hash");
        assert_eq!(filter["must_not"][0]["match"]["value"], "hash-new");
    }

    #[test]
    fn collection_filter_matches_collection() {
        let filter = collection_filter("papers");
        assert_eq!(filter["must"][0]["key"], "collection");
        assert_eq!(filter["must"][0]["match"]["value"], "papers");
    }
}
