//! Cheap change detection for source files.
//!
//! A document's identity over time is `(modification time, content hash)`.
//! The modification time comparison is the fast path: when it matches the
//! recorded value the file is treated as unchanged without reading a byte of
//! content. Only a differing mtime triggers the SHA-256 pass, and a matching
//! hash despite a differing mtime refreshes the recorded mtime so future
//! checks stay on the fast path.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::metadata::{DocumentRecord, DocumentStatus};

/// Outcome of comparing a file against its last recorded fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    /// Modification time matches the record; nothing to do.
    Unchanged,
    /// Bytes are identical but the mtime moved; refresh the recorded mtime only.
    RefreshMtime {
        /// Current modification time in nanoseconds since the epoch.
        mtime_ns: i64,
    },
    /// Content changed (or the document was never indexed); reindex.
    Reindex {
        /// Current modification time in nanoseconds since the epoch.
        mtime_ns: i64,
        /// SHA-256 hex digest of the file contents.
        file_hash: String,
    },
}

/// Current modification time of `path` in nanoseconds since the Unix epoch.
pub fn file_mtime_ns(path: &Path) -> std::io::Result<i64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos() as i64)
        .unwrap_or(0))
}

/// Streaming SHA-256 of the file contents, hex encoded.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Decide whether `path` needs reindexing given its last recorded state.
///
/// The skip paths apply only to documents whose last attempt committed
/// (`status == Indexed`); partially extracted or failed documents always
/// re-enter extraction so the page cache can resume them. `force` bypasses
/// both comparisons.
pub fn detect_change(
    existing: Option<&DocumentRecord>,
    path: &Path,
    force: bool,
) -> std::io::Result<ChangeDecision> {
    let mtime_ns = file_mtime_ns(path)?;

    if !force
        && let Some(record) = existing
        && record.status == DocumentStatus::Indexed
    {
        if record.file_mtime_ns == mtime_ns {
            return Ok(ChangeDecision::Unchanged);
        }
        let file_hash = hash_file(path)?;
        if file_hash == record.file_hash {
            return Ok(ChangeDecision::RefreshMtime { mtime_ns });
        }
        return Ok(ChangeDecision::Reindex { mtime_ns, file_hash });
    }

    let file_hash = hash_file(path)?;
    Ok(ChangeDecision::Reindex { mtime_ns, file_hash })
}
