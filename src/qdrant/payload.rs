//! Helpers for constructing Qdrant chunk payloads.

use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::qdrant::types::PointInsert;

/// Build the payload object stored alongside each indexed chunk.
pub(crate) fn build_payload(
    doc_id: &str,
    collection: &str,
    file_path: &str,
    file_hash: &str,
    timestamp_rfc3339: &str,
    chunk: &PointInsert,
) -> Value {
    let mut payload = Map::new();
    payload.insert("doc_id".into(), Value::String(doc_id.to_string()));
    payload.insert("collection".into(), Value::String(collection.to_string()));
    payload.insert("file_path".into(), Value::String(file_path.to_string()));
    payload.insert("file_hash".into(), Value::String(file_hash.to_string()));
    payload.insert("chunk_index".into(), json!(chunk.chunk_index));
    payload.insert("token_count".into(), json!(chunk.token_count));
    payload.insert(
        "timestamp".into(),
        Value::String(timestamp_rfc3339.to_string()),
    );
    payload.insert("text".into(), Value::String(chunk.text.clone()));
    Value::Object(payload)
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Construct an identifier suitable for Qdrant points.
pub(crate) fn generate_point_id() -> String {
    Uuid::new_v4().to_string()
}
