//! Durable metadata store: collections, documents, and the per-page
//! extraction cache.
//!
//! Backed by SQLite so that resumable extraction survives a full process
//! crash. The page cache is keyed by `(content hash, page index)`; entries
//! are immutable once written: a changed file hashes into a disjoint
//! namespace, so the only legal rewrite is an identical replay.

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised by the metadata store.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Filesystem preparation for the database file failed.
    #[error("failed to prepare data directory: {0}")]
    Io(#[from] std::io::Error),
    /// A page cache key was rewritten with divergent content.
    ///
    /// Should never occur under correct hash-based namespacing; surfaced as
    /// an internal error rather than silently clobbering the entry.
    #[error("page cache conflict for hash {file_hash} page {page_index}")]
    CacheConflict {
        /// Content hash namespace of the colliding entry.
        file_hash: String,
        /// Page index of the colliding entry.
        page_index: usize,
    },
}

/// Lifecycle state of a document's most recent indexing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    /// Chunks and vectors are committed for the recorded content hash.
    Indexed,
    /// Extraction left gaps; the document is resumable.
    Partial,
    /// The last attempt failed; nothing was committed.
    Failed,
}

impl DocumentStatus {
    /// Stable string form stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Indexed => "indexed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "indexed" => Ok(Self::Indexed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

/// How a cached page was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMethod {
    /// Local text-layer extraction.
    Local,
    /// Remote OCR service.
    Remote,
    /// Permanent-failure sentinel; the page is never re-attempted at this hash.
    Failed,
}

impl PageMethod {
    /// Stable string form stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for PageMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

/// A named grouping of documents.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    /// Collection name (primary key).
    pub name: String,
    /// Creation timestamp as recorded by SQLite.
    pub created_at: String,
    /// Number of member documents.
    pub document_count: i64,
}

/// Stored state of an indexed (or attempted) document.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Deterministic identifier derived from collection and path.
    pub doc_id: String,
    /// Absolute source file path.
    pub file_path: String,
    /// Content hash of the last attempt.
    pub file_hash: String,
    /// Modification time recorded at the last successful commit.
    pub file_mtime_ns: i64,
    /// File kind (`pdf`, `docx`, `plaintext`).
    pub file_type: String,
    /// Owning collection.
    pub collection: String,
    /// Chunks committed for the current content hash.
    pub chunk_count: i64,
    /// Outcome of the most recent attempt.
    pub status: DocumentStatus,
    /// Failure reason when `status` is `Failed`.
    pub error: Option<String>,
    /// Timestamp of the last attempt.
    pub indexed_at: String,
}

/// One durable page extraction result.
#[derive(Debug, Clone)]
pub struct PageCacheEntry {
    /// Extracted page text (empty for the failure sentinel).
    pub content: String,
    /// How the entry was produced.
    pub method: PageMethod,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS documents (
    doc_id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    file_mtime_ns INTEGER NOT NULL DEFAULT 0,
    file_type TEXT NOT NULL,
    collection TEXT NOT NULL,
    chunk_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'failed',
    error TEXT,
    indexed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
CREATE INDEX IF NOT EXISTS idx_documents_file_path ON documents(file_path);
CREATE INDEX IF NOT EXISTS idx_documents_file_hash ON documents(file_hash);

CREATE TABLE IF NOT EXISTS page_cache (
    file_hash TEXT NOT NULL,
    page_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    method TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (file_hash, page_index)
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// SQLite-backed store for collections, documents, and the page cache.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if necessary) the database at `db_path` and apply the schema.
    pub async fn connect(db_path: &Path) -> Result<Self, MetadataError> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        tracing::debug!(path = %db_path.display(), "Metadata store ready");

        Ok(Self { pool })
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create a collection, returning `false` when it already exists.
    pub async fn create_collection(&self, name: &str) -> Result<bool, MetadataError> {
        let result = sqlx::query("INSERT OR IGNORE INTO collections (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a collection; member documents cascade away.
    pub async fn delete_collection(&self, name: &str) -> Result<bool, MetadataError> {
        let result = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Whether a collection with this name exists.
    pub async fn collection_exists(&self, name: &str) -> Result<bool, MetadataError> {
        let row = sqlx::query("SELECT 1 FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Fetch a collection with its document count.
    pub async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>, MetadataError> {
        let row = sqlx::query(
            "SELECT c.name, c.created_at, COUNT(d.doc_id) AS document_count \
             FROM collections c LEFT JOIN documents d ON c.name = d.collection \
             WHERE c.name = ? GROUP BY c.name",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| row_to_collection(&row)))
    }

    /// Enumerate all collections with their document counts.
    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>, MetadataError> {
        let rows = sqlx::query(
            "SELECT c.name, c.created_at, COUNT(d.doc_id) AS document_count \
             FROM collections c LEFT JOIN documents d ON c.name = d.collection \
             GROUP BY c.name ORDER BY c.name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_collection).collect())
    }

    /// Record a fully committed document, replacing any previous record.
    #[allow(clippy::too_many_arguments)]
    pub async fn commit_document(
        &self,
        doc_id: &str,
        file_path: &str,
        file_hash: &str,
        file_mtime_ns: i64,
        file_type: &str,
        collection: &str,
        chunk_count: usize,
    ) -> Result<(), MetadataError> {
        sqlx::query(
            "INSERT OR REPLACE INTO documents \
             (doc_id, file_path, file_hash, file_mtime_ns, file_type, collection, chunk_count, status, error, indexed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'indexed', NULL, CURRENT_TIMESTAMP)",
        )
        .bind(doc_id)
        .bind(file_path)
        .bind(file_hash)
        .bind(file_mtime_ns)
        .bind(file_type)
        .bind(collection)
        .bind(chunk_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a partial or failed attempt without disturbing the committed
    /// fingerprint.
    ///
    /// The stored mtime and chunk count are left untouched for existing rows
    /// so a crash or failure never falsely marks a change as applied; the
    /// content hash moves to the namespace the attempt worked in so cache
    /// cleanup on deletion targets the right entries.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_attempt(
        &self,
        doc_id: &str,
        file_path: &str,
        file_hash: &str,
        file_type: &str,
        collection: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<(), MetadataError> {
        sqlx::query(
            "INSERT INTO documents \
             (doc_id, file_path, file_hash, file_mtime_ns, file_type, collection, chunk_count, status, error, indexed_at) \
             VALUES (?, ?, ?, 0, ?, ?, 0, ?, ?, CURRENT_TIMESTAMP) \
             ON CONFLICT(doc_id) DO UPDATE SET \
             file_hash = excluded.file_hash, \
             status = excluded.status, \
             error = excluded.error, \
             indexed_at = CURRENT_TIMESTAMP",
        )
        .bind(doc_id)
        .bind(file_path)
        .bind(file_hash)
        .bind(file_type)
        .bind(collection)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up a document by source path within a collection.
    pub async fn document_by_path(
        &self,
        file_path: &str,
        collection: &str,
    ) -> Result<Option<DocumentRecord>, MetadataError> {
        let row = sqlx::query("SELECT * FROM documents WHERE file_path = ? AND collection = ?")
            .bind(file_path)
            .bind(collection)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row_to_document(&row)))
    }

    /// Enumerate documents, optionally scoped to a collection.
    pub async fn list_documents(
        &self,
        collection: Option<&str>,
    ) -> Result<Vec<DocumentRecord>, MetadataError> {
        let rows = match collection {
            Some(name) => {
                sqlx::query("SELECT * FROM documents WHERE collection = ? ORDER BY file_path")
                    .bind(name)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM documents ORDER BY collection, file_path")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(row_to_document).collect())
    }

    /// Refresh the recorded modification time after a hash-equal touch.
    pub async fn update_document_mtime(
        &self,
        doc_id: &str,
        file_mtime_ns: i64,
    ) -> Result<(), MetadataError> {
        sqlx::query("UPDATE documents SET file_mtime_ns = ? WHERE doc_id = ?")
            .bind(file_mtime_ns)
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a document record.
    pub async fn remove_document(&self, doc_id: &str) -> Result<bool, MetadataError> {
        let result = sqlx::query("DELETE FROM documents WHERE doc_id = ?")
            .bind(doc_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Look up one cached page extraction result.
    pub async fn cached_page(
        &self,
        file_hash: &str,
        page_index: usize,
    ) -> Result<Option<PageCacheEntry>, MetadataError> {
        let row = sqlx::query(
            "SELECT content, method FROM page_cache WHERE file_hash = ? AND page_index = ?",
        )
        .bind(file_hash)
        .bind(page_index as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| PageCacheEntry {
            content: row.get("content"),
            method: row
                .get::<String, _>("method")
                .parse()
                .unwrap_or(PageMethod::Failed),
        }))
    }

    /// Store one page extraction result.
    ///
    /// Writing an identical entry twice is a no-op; divergent content for an
    /// existing key is rejected with [`MetadataError::CacheConflict`].
    pub async fn cache_page(
        &self,
        file_hash: &str,
        page_index: usize,
        content: &str,
        method: PageMethod,
    ) -> Result<(), MetadataError> {
        let result = sqlx::query(
            "INSERT INTO page_cache (file_hash, page_index, content, method) VALUES (?, ?, ?, ?) \
             ON CONFLICT(file_hash, page_index) DO NOTHING",
        )
        .bind(file_hash)
        .bind(page_index as i64)
        .bind(content)
        .bind(method.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.cached_page(file_hash, page_index).await? {
            Some(existing) if existing.content == content => Ok(()),
            Some(_) => Err(MetadataError::CacheConflict {
                file_hash: file_hash.to_string(),
                page_index,
            }),
            None => Ok(()),
        }
    }

    /// Delete all cache entries under a content hash, returning how many were removed.
    pub async fn clear_page_cache(&self, file_hash: &str) -> Result<u64, MetadataError> {
        let result = sqlx::query("DELETE FROM page_cache WHERE file_hash = ?")
            .bind(file_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of cache entries currently stored under a content hash.
    pub async fn count_cached_pages(&self, file_hash: &str) -> Result<u64, MetadataError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM page_cache WHERE file_hash = ?")
            .bind(file_hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    /// Fetch a process-level metadata value (e.g. the embedding model pin).
    pub async fn get_meta(&self, key: &str) -> Result<Option<String>, MetadataError> {
        let row = sqlx::query("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("value")))
    }

    /// Store a process-level metadata value.
    pub async fn set_meta(&self, key: &str, value: &str) -> Result<(), MetadataError> {
        sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_collection(row: &SqliteRow) -> CollectionInfo {
    CollectionInfo {
        name: row.get("name"),
        created_at: row.get("created_at"),
        document_count: row.get("document_count"),
    }
}

fn row_to_document(row: &SqliteRow) -> DocumentRecord {
    DocumentRecord {
        doc_id: row.get("doc_id"),
        file_path: row.get("file_path"),
        file_hash: row.get("file_hash"),
        file_mtime_ns: row.get("file_mtime_ns"),
        file_type: row.get("file_type"),
        collection: row.get("collection"),
        chunk_count: row.get("chunk_count"),
        status: row
            .get::<String, _>("status")
            .parse()
            .unwrap_or(DocumentStatus::Failed),
        error: row.get("error"),
        indexed_at: row.get("indexed_at"),
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
    async fn cache_entries_are_immutable() {
        let (_dir, store) = store().await;

        store
            .cache_page("hash-a", 0, "page text", PageMethod::Local)
            .await
            .expect("first write");

        // Identical replay no-ops.
        store
            .cache_page("hash-a", 0, "page text", PageMethod::Local)
            .await
            .expect("identical replay");

        // Divergent content is a conflict.
        let err = store
            .cache_page("hash-a", 0, "different text", PageMethod::Local)
            .await
            .expect_err("conflict expected");
        assert!(matches!(err, MetadataError::CacheConflict { .. }));

        // A different hash is a disjoint namespace.
        store
            .cache_page("hash-b", 0, "different text", PageMethod::Remote)
            .await
            .expect("other namespace");
    }

    #[tokio::test]
    async fn clear_removes_only_one_namespace() {
        let (_dir, store) = store().await;
        store
            .cache_page("hash-a", 0, "a0", PageMethod::Local)
            .await
            .expect("write");
        store
            .cache_page("hash-a", 1, "a1", PageMethod::Remote)
            .await
            .expect("write");
        store
            .cache_page("hash-b", 0, "b0", PageMethod::Local)
            .await
            .expect("write");

        assert_eq!(store.clear_page_cache("hash-a").await.expect("clear"), 2);
        assert_eq!(store.count_cached_pages("hash-a").await.expect("count"), 0);
        assert_eq!(store.count_cached_pages("hash-b").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn failure_sentinel_round_trips() {
        let (_dir, store) = store().await;
        store
            .cache_page("hash-a", 3, "", PageMethod::Failed)
            .await
            .expect("write sentinel");
        let entry = store
            .cached_page("hash-a", 3)
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(entry.method, PageMethod::Failed);
        assert!(entry.content.is_empty());
    }

    #[tokio::test]
    async fn deleting_a_collection_cascades_to_documents() {
        let (_dir, store) = store().await;
        store.create_collection("papers").await.expect("create");
        store
            .commit_document("doc-1", "/tmp/a.pdf", "hash-a", 1, "pdf", "papers", 4)
            .await
            .expect("commit");

        assert!(store.delete_collection("papers").await.expect("delete"));
        assert!(
            store
                .document_by_path("/tmp/a.pdf", "papers")
                .await
                .expect("lookup")
                .is_none()
        );
    }

    #[tokio::test]
    async fn collection_info_counts_member_documents() {
        let (_dir, store) = store().await;
        store.create_collection("papers").await.expect("create");
        assert!(store.collection_exists("papers").await.expect("exists"));
        store
            .commit_document("doc-1", "/tmp/a.pdf", "hash-a", 1, "pdf", "papers", 4)
            .await
            .expect("commit");

        let info = store
            .get_collection("papers")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(info.document_count, 1);
        assert_eq!(store.list_collections().await.expect("list").len(), 1);
        assert!(store.get_collection("missing").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn record_attempt_preserves_committed_fingerprint() {
        let (_dir, store) = store().await;
        store.create_collection("papers").await.expect("create");
        store
            .commit_document("doc-1", "/tmp/a.pdf", "hash-old", 42, "pdf", "papers", 4)
            .await
            .expect("commit");

        store
            .record_attempt(
                "doc-1",
                "/tmp/a.pdf",
                "hash-new",
                "pdf",
                "papers",
                DocumentStatus::Partial,
                None,
            )
            .await
            .expect("attempt");

        let record = store
            .document_by_path("/tmp/a.pdf", "papers")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(record.status, DocumentStatus::Partial);
        assert_eq!(record.file_hash, "hash-new");
        assert_eq!(record.file_mtime_ns, 42);
        assert_eq!(record.chunk_count, 4);
    }

    #[tokio::test]
    async fn meta_values_round_trip() {
        let (_dir, store) = store().await;
        assert!(store.get_meta("embedding_model").await.expect("get").is_none());
        store
            .set_meta("embedding_model", "nomic-embed-text")
            .await
            .expect("set");
        assert_eq!(
            store.get_meta("embedding_model").await.expect("get").as_deref(),
            Some("nomic-embed-text")
        );
    }
}
