//! The error taxonomy shared by every adapter, the index, and the aggregator.
//!
//! Most variants are never threaded back to a caller as a `Result::Err` — the
//! policy for a given kind (skip the record, drop the file, rebuild the
//! index, ...) is described alongside each variant and enforced by the
//! callers of this type, not by the type itself.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A single record within a session file did not parse. Policy: skip the
    /// record, keep scanning the rest of the file.
    #[error("malformed record in {path} at line {line}: {reason}")]
    RecordMalformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A whole file could not be opened or read. Policy: drop the file
    /// silently; do not emit a deletion for it either.
    #[error("cannot read session file {path}: {source}")]
    FileUnparseable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The relational-store adapter failed a query or timed out against a
    /// locked database. Policy: drop that project's sessions for this scan,
    /// keep whatever was previously indexed for it.
    #[error("relational store error for project at {path}: {source}")]
    RelationalError {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The on-disk schema version stamp does not match the compiled version.
    /// Policy: delete the index directory and rebuild from scratch.
    #[error("schema version mismatch: on-disk {on_disk}, compiled {compiled}")]
    SchemaMismatch { on_disk: u32, compiled: u32 },

    /// Fuzzy query construction failed (e.g. pathological input). Policy:
    /// return an empty result set.
    #[error("query could not be constructed: {reason}")]
    QueryMalformed { reason: String },

    /// An adapter's configured root does not exist. Policy: empty upserts,
    /// delete every previously known id for that adapter's own agent.
    #[error("adapter root missing: {path}")]
    AdapterRootMissing { path: PathBuf },

    /// An index commit failed. Policy: report failure to the caller and
    /// invalidate the in-memory cache.
    #[error("index write failed: {source}")]
    WriteFailure {
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    pub fn file_unparseable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileUnparseable {
            path: path.into(),
            source,
        }
    }

    pub fn record_malformed(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::RecordMalformed {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_unparseable_display_includes_path() {
        let err = ScanError::file_unparseable(
            "/tmp/session.jsonl",
            std::io::Error::new(std::io::ErrorKind::NotFound, "nope"),
        );
        assert!(err.to_string().contains("/tmp/session.jsonl"));
    }

    #[test]
    fn schema_mismatch_display_shows_both_versions() {
        let err = ScanError::SchemaMismatch {
            on_disk: 12,
            compiled: 13,
        };
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("13"));
    }
}
