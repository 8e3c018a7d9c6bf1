use crate::{SearchError, SearchIndex};
use session_scan_core::error::ScanError;
use session_scan_core::types::SessionRecord;
use tantivy::{doc, Term};
use tracing::{debug, info, warn};

impl SearchIndex {
    /// Add `sessions` and commit. Callers must delete any prior version of
    /// each `id` first — this does not delete-before-add itself.
    pub fn add(&self, sessions: &[SessionRecord]) -> Result<(), SearchError> {
        let writer = self.writer.lock().map_err(|e| {
            SearchError::Io(std::io::Error::other(format!("index writer lock poisoned: {e}")))
        })?;

        for session in sessions {
            let tantivy_doc = doc!(
                self.id_field => session.id.as_str(),
                self.title_field => session.title.as_str(),
                self.directory_field => session.directory.as_str(),
                self.agent_field => session.agent.tag(),
                self.content_field => session.content.as_str(),
                self.timestamp_field => session.timestamp.timestamp() as f64,
                self.message_count_field => session.message_count as u64,
                self.mtime_field => session.mtime,
                self.yolo_field => session.yolo,
                self.preview_field => session.preview.as_str(),
            );
            writer.add_document(tantivy_doc)?;
        }

        drop(writer);
        self.commit()?;
        debug!(count = sessions.len(), "added sessions to search index");
        Ok(())
    }

    /// Delete every document whose `id` is in `ids` and commit.
    pub fn delete_ids(&self, ids: &[String]) -> Result<(), SearchError> {
        if ids.is_empty() {
            return Ok(());
        }
        {
            let writer = self.writer.lock().map_err(|e| {
                SearchError::Io(std::io::Error::other(format!("index writer lock poisoned: {e}")))
            })?;
            for id in ids {
                let term = Term::from_field_text(self.id_field, id);
                writer.delete_term(term);
            }
        }
        self.commit()?;
        debug!(count = ids.len(), "deleted sessions from search index");
        Ok(())
    }

    fn commit(&self) -> Result<(), SearchError> {
        let mut writer = self.writer.lock().map_err(|e| {
            SearchError::Io(std::io::Error::other(format!("index writer lock poisoned: {e}")))
        })?;
        if let Err(e) = writer.commit() {
            let err = ScanError::WriteFailure {
                source: std::io::Error::other(e.to_string()),
            };
            warn!(%err, "index commit failed, caller must invalidate its in-memory cache");
            return Err(e.into());
        }
        info!("search index committed");
        Ok(())
    }
}
