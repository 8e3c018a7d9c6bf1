//! The durable full-text search index.
//!
//! - Schema: one document per [`SessionRecord`], `title`/`content` tokenized
//!   for fuzzy search, `agent` indexed for exact-term filtering, everything
//!   else stored only for reconstruction.
//! - Write path: callers delete any prior version of a document by `id`
//!   before adding the new one, then commit explicitly.
//! - Read path: a `ReloadPolicy::OnCommitWithDelay` reader, so searches see a
//!   consistent snapshot that advances on commit.
//! - Storage: on-disk Tantivy directory with a `schema_version` stamp file
//!   alongside it; a version mismatch wipes everything except the stamp and
//!   rebuilds empty.

pub mod indexer;
pub mod query;

use session_scan_core::error::ScanError;
use session_scan_core::types::{Agent, KnownMap, SessionRecord};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tantivy::schema::{Field, Schema, FAST, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::warn;

/// Bump whenever the field list, field options, or stored-field set changes.
///
/// Version 1: initial schema — id/title/directory/agent/content/timestamp/
/// message_count, content stored (unlike the system this was distilled from,
/// which left content un-stored and relied on a side cache for full-text
/// reconstruction).
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_FILE: &str = ".schema_version";
const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Tantivy(#[from] tantivy::TantivyError),
    #[error(transparent)]
    QueryParse(#[from] tantivy::query::QueryParserError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("index not ready")]
    NotReady,
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("id", STRING | STORED);
    builder.add_text_field("title", TEXT | STORED);
    builder.add_text_field("directory", STRING | STORED);
    builder.add_text_field("agent", STRING | STORED);
    builder.add_text_field("content", TEXT | STORED);
    builder.add_f64_field("timestamp", FAST | STORED);
    builder.add_u64_field("message_count", FAST | STORED);
    builder.add_f64_field("mtime", FAST | STORED);
    builder.add_bool_field("yolo", STORED);
    builder.add_text_field("preview", STORED);
    builder.build()
}

pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    schema: Schema,

    id_field: Field,
    title_field: Field,
    directory_field: Field,
    agent_field: Field,
    content_field: Field,
    timestamp_field: Field,
    message_count_field: Field,
    mtime_field: Field,
    yolo_field: Field,
    preview_field: Field,
}

impl SearchIndex {
    /// Open or create the on-disk index at `path`. A schema version mismatch
    /// wipes every file in `path` except the version stamp and rebuilds
    /// empty.
    pub fn open(path: &Path) -> Result<Self, SearchError> {
        fs::create_dir_all(path)?;
        let version_path = path.join(SCHEMA_VERSION_FILE);
        let on_disk_version = fs::read_to_string(&version_path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok());

        if on_disk_version != Some(SCHEMA_VERSION) {
            if let Some(on_disk) = on_disk_version {
                let err = ScanError::SchemaMismatch {
                    on_disk,
                    compiled: SCHEMA_VERSION,
                };
                warn!(%err, path = %path.display(), "index schema mismatch, rebuilding from scratch");
            }
            for entry in fs::read_dir(path)?.filter_map(Result::ok) {
                if entry.file_name() == SCHEMA_VERSION_FILE {
                    continue;
                }
                let entry_path = entry.path();
                if entry_path.is_dir() {
                    fs::remove_dir_all(&entry_path)?;
                } else {
                    fs::remove_file(&entry_path)?;
                }
            }
            fs::write(&version_path, SCHEMA_VERSION.to_string())?;
        }

        let schema = build_schema();
        let index = Index::open_or_create(tantivy::directory::MmapDirectory::open(path)?, schema.clone())?;
        Self::from_index(index, schema)
    }

    /// In-memory index for tests that only exercise index-internal behavior.
    pub fn open_in_ram() -> Result<Self, SearchError> {
        let schema = build_schema();
        let index = Index::create_in_ram(schema.clone());
        Self::from_index(index, schema)
    }

    fn from_index(index: Index, schema: Schema) -> Result<Self, SearchError> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;
        let writer = index.writer(WRITER_HEAP_BYTES)?;

        Ok(Self {
            id_field: schema.get_field("id").expect("schema has id"),
            title_field: schema.get_field("title").expect("schema has title"),
            directory_field: schema.get_field("directory").expect("schema has directory"),
            agent_field: schema.get_field("agent").expect("schema has agent"),
            content_field: schema.get_field("content").expect("schema has content"),
            timestamp_field: schema.get_field("timestamp").expect("schema has timestamp"),
            message_count_field: schema.get_field("message_count").expect("schema has message_count"),
            mtime_field: schema.get_field("mtime").expect("schema has mtime"),
            yolo_field: schema.get_field("yolo").expect("schema has yolo"),
            preview_field: schema.get_field("preview").expect("schema has preview"),
            index,
            reader,
            writer: Mutex::new(writer),
            schema,
        })
    }

    /// Every document's `(id, timestamp, agent)`, for the incremental-diff
    /// protocol. A single match-all query bounded by the stored document
    /// count.
    pub fn known_sessions(&self) -> Result<KnownMap, SearchError> {
        let mut out = KnownMap::new();
        for doc in self.all_documents()? {
            if let (Some(id), Some(mtime), Some(agent)) = (
                get_text(&doc, &self.schema, self.id_field),
                get_f64(&doc, &self.schema, self.mtime_field),
                get_text(&doc, &self.schema, self.agent_field),
            ) {
                if let Some(agent) = Agent::from_tag(&agent) {
                    out.insert(id, (mtime, agent));
                }
            }
        }
        Ok(out)
    }

    /// Reconstruct every stored `SessionRecord`.
    pub fn all_sessions(&self) -> Result<Vec<SessionRecord>, SearchError> {
        Ok(self
            .all_documents()?
            .iter()
            .filter_map(|doc| self.document_to_record(doc))
            .collect())
    }

    fn all_documents(&self) -> Result<Vec<tantivy::TantivyDocument>, SearchError> {
        use tantivy::collector::TopDocs;
        use tantivy::query::AllQuery;

        let searcher = self.reader.searcher();
        let limit = (searcher.num_docs() as usize).max(1);
        let hits = searcher.search(&AllQuery, &TopDocs::with_limit(limit))?;
        hits.into_iter()
            .map(|(_score, addr)| searcher.doc(addr).map_err(SearchError::from))
            .collect()
    }

    fn document_to_record(&self, doc: &tantivy::TantivyDocument) -> Option<SessionRecord> {
        let id = get_text(doc, &self.schema, self.id_field)?;
        let agent_tag = get_text(doc, &self.schema, self.agent_field)?;
        let agent = Agent::from_tag(&agent_tag)?;
        let title = get_text(doc, &self.schema, self.title_field).unwrap_or_default();
        let directory = get_text(doc, &self.schema, self.directory_field).unwrap_or_default();
        let content = get_text(doc, &self.schema, self.content_field).unwrap_or_default();
        let preview = get_text(doc, &self.schema, self.preview_field).unwrap_or_default();
        let timestamp_secs = get_f64(doc, &self.schema, self.timestamp_field)?;
        let mtime = get_f64(doc, &self.schema, self.mtime_field)?;
        let message_count = get_u64(doc, &self.schema, self.message_count_field).unwrap_or(0) as u32;
        let yolo = get_bool(doc, &self.schema, self.yolo_field).unwrap_or(false);

        let timestamp = chrono::DateTime::<chrono::Utc>::from(
            std::time::SystemTime::UNIX_EPOCH
                + std::time::Duration::from_secs_f64(timestamp_secs.max(0.0)),
        );

        Some(SessionRecord {
            id,
            agent,
            title,
            directory,
            timestamp,
            preview,
            content,
            message_count,
            mtime,
            yolo,
        })
    }
}

fn get_text(doc: &tantivy::TantivyDocument, _schema: &Schema, field: Field) -> Option<String> {
    use tantivy::schema::document::Value;
    doc.get_first(field).and_then(|v| v.as_str()).map(String::from)
}

fn get_f64(doc: &tantivy::TantivyDocument, _schema: &Schema, field: Field) -> Option<f64> {
    use tantivy::schema::document::Value;
    doc.get_first(field).and_then(|v| v.as_f64())
}

fn get_u64(doc: &tantivy::TantivyDocument, _schema: &Schema, field: Field) -> Option<u64> {
    use tantivy::schema::document::Value;
    doc.get_first(field).and_then(|v| v.as_u64())
}

fn get_bool(doc: &tantivy::TantivyDocument, _schema: &Schema, field: Field) -> Option<bool> {
    use tantivy::schema::document::Value;
    doc.get_first(field).and_then(|v| v.as_bool())
}

#[cfg(test)]
mod tests {
    use super::*;
    use session_scan_core::types::SessionRecord;

    fn sample(id: &str, agent: Agent, title: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            agent,
            title: title.to_string(),
            directory: "/home/u/proj".to_string(),
            timestamp: chrono::Utc::now(),
            preview: title.to_string(),
            content: format!("» {title}"),
            message_count: 1,
            mtime: 1_700_000_000.0,
            yolo: false,
        }
    }

    #[test]
    fn build_schema_has_all_fields() {
        let schema = build_schema();
        for name in [
            "id",
            "title",
            "directory",
            "agent",
            "content",
            "timestamp",
            "message_count",
            "mtime",
            "yolo",
            "preview",
        ] {
            assert!(schema.get_field(name).is_ok(), "missing field {name}");
        }
    }

    #[test]
    fn open_in_ram_starts_empty() {
        let index = SearchIndex::open_in_ram().unwrap();
        assert!(index.known_sessions().unwrap().is_empty());
        assert!(index.all_sessions().unwrap().is_empty());
    }

    #[test]
    fn add_then_known_sessions_round_trips() {
        let index = SearchIndex::open_in_ram().unwrap();
        index
            .add(&[sample("s1", Agent::Claude, "authentication bug")])
            .unwrap();

        let known = index.known_sessions().unwrap();
        assert_eq!(known.len(), 1);
        assert_eq!(known.get("s1"), Some(&(1_700_000_000.0, Agent::Claude)));
    }

    #[test]
    fn delete_then_add_matches_add_alone() {
        let a = SearchIndex::open_in_ram().unwrap();
        a.add(&[sample("s1", Agent::Claude, "same title")]).unwrap();

        let b = SearchIndex::open_in_ram().unwrap();
        b.add(&[sample("s1", Agent::Claude, "old title")]).unwrap();
        b.delete_ids(&["s1".to_string()]).unwrap();
        b.add(&[sample("s1", Agent::Claude, "same title")]).unwrap();

        assert_eq!(a.all_sessions().unwrap().len(), b.all_sessions().unwrap().len());
    }

    #[test]
    fn on_disk_open_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = SearchIndex::open(dir.path()).unwrap();
            index.add(&[sample("s1", Agent::Claude, "persisted")]).unwrap();
        }
        let reopened = SearchIndex::open(dir.path()).unwrap();
        assert_eq!(reopened.known_sessions().unwrap().len(), 1);
    }

    #[test]
    fn schema_version_bump_wipes_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = SearchIndex::open(dir.path()).unwrap();
            index.add(&[sample("s1", Agent::Claude, "will be wiped")]).unwrap();
        }
        std::fs::write(dir.path().join(SCHEMA_VERSION_FILE), "999").unwrap();
        let reopened = SearchIndex::open(dir.path()).unwrap();
        assert!(reopened.known_sessions().unwrap().is_empty());
    }
}
