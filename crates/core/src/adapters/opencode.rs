//! Adapter E: OpenCode.
//!
//! Source layout: three independent directories under a storage root —
//! `session/`, `message/<session-id>/`, `part/<message-id>/` — each holding
//! one small JSON descriptor file per entity. A naive implementation would
//! scan messages and parts per session (`O(S·M·P)`); instead this adapter
//! builds a messages-by-session and parts-by-message index once, and only
//! when at least one session actually needs reparsing.

use crate::adapter::Adapter;
use crate::content::{cap_content, derive_preview, derive_title, push_assistant_line, push_human_line};
use crate::error::ScanError;
use crate::types::{Agent, DiffResult, KnownMap, SessionRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

const MTIME_TOLERANCE_SECS: f64 = 0.001;
const TITLE_SEED_MIN_CHARS: usize = 10;

pub struct OpenCodeAdapter {
    root: Option<PathBuf>,
    content_cap_chars: usize,
    preview_cap_chars: usize,
}

impl OpenCodeAdapter {
    pub fn new(root: Option<PathBuf>, content_cap_chars: usize, preview_cap_chars: usize) -> Self {
        Self {
            root,
            content_cap_chars,
            preview_cap_chars,
        }
    }

    fn root_path(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn session_dir(&self) -> Option<PathBuf> {
        self.root_path().map(|r| r.join("session"))
    }

    fn message_dir(&self) -> Option<PathBuf> {
        self.root_path().map(|r| r.join("message"))
    }

    fn part_dir(&self) -> Option<PathBuf> {
        self.root_path().map(|r| r.join("part"))
    }

    /// Cheap pass: read only the session descriptors (small, O(S)). Returns
    /// `(id, path, mtime, directory, descriptor_created_ms)`.
    fn scan_session_descriptors(&self) -> Vec<SessionDescriptor> {
        let Some(dir) = self.session_dir() else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let mtime = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => system_time_to_secs(t),
                Err(e) => {
                    warn!(err = %ScanError::file_unparseable(path.as_path(), e), "skipping unreadable opencode session descriptor");
                    continue;
                }
            };
            let raw = match fs::read_to_string(&path) {
                Ok(s) => s,
                Err(e) => {
                    warn!(err = %ScanError::file_unparseable(path.as_path(), e), "skipping unreadable opencode session descriptor");
                    continue;
                }
            };
            let value: serde_json::Value = match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        err = %ScanError::record_malformed(path.as_path(), 0, e.to_string()),
                        "skipping malformed opencode session descriptor"
                    );
                    continue;
                }
            };
            let id = value
                .get("id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string());
            let directory = value
                .get("directory")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let created_ms = value.get("time").and_then(|t| t.get("created")).and_then(|v| v.as_f64());
            out.push(SessionDescriptor {
                id,
                directory,
                file_mtime: mtime,
                created_ms,
            });
        }
        out
    }

    /// Build `{session_id -> [message descriptors sorted by filename]}` and
    /// `{message_id -> concatenated text from its text parts}`. Only called
    /// when at least one session needs reparsing.
    fn build_indexes(&self) -> (HashMap<String, Vec<MessageDescriptor>>, HashMap<String, String>) {
        let mut messages_by_session: HashMap<String, Vec<MessageDescriptor>> = HashMap::new();
        if let Some(message_root) = self.message_dir() {
            if let Ok(session_dirs) = fs::read_dir(&message_root) {
                for session_entry in session_dirs.filter_map(Result::ok) {
                    let session_path = session_entry.path();
                    if !session_path.is_dir() {
                        continue;
                    }
                    let session_id = session_path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("unknown")
                        .to_string();
                    let Ok(files) = fs::read_dir(&session_path) else {
                        continue;
                    };
                    let mut names: Vec<PathBuf> = files
                        .filter_map(Result::ok)
                        .map(|e| e.path())
                        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
                        .collect();
                    names.sort();

                    let mut descriptors = Vec::new();
                    for path in names {
                        let Ok(raw) = fs::read_to_string(&path) else { continue };
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
                            continue;
                        };
                        let id = value
                            .get("id")
                            .and_then(|v| v.as_str())
                            .map(String::from)
                            .unwrap_or_else(|| path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string());
                        let role = value.get("role").and_then(|v| v.as_str()).unwrap_or("").to_string();
                        descriptors.push(MessageDescriptor { id, role });
                    }
                    messages_by_session.insert(session_id, descriptors);
                }
            }
        }

        let mut parts_by_message: HashMap<String, String> = HashMap::new();
        if let Some(part_root) = self.part_dir() {
            if let Ok(message_dirs) = fs::read_dir(&part_root) {
                for message_entry in message_dirs.filter_map(Result::ok) {
                    let message_path = message_entry.path();
                    if !message_path.is_dir() {
                        continue;
                    }
                    let message_id = message_path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("unknown")
                        .to_string();
                    let Ok(files) = fs::read_dir(&message_path) else {
                        continue;
                    };
                    let mut names: Vec<PathBuf> = files
                        .filter_map(Result::ok)
                        .map(|e| e.path())
                        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
                        .collect();
                    names.sort();

                    let mut text_parts = Vec::new();
                    for path in names {
                        let Ok(raw) = fs::read_to_string(&path) else { continue };
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
                            continue;
                        };
                        if value.get("type").and_then(|v| v.as_str()) != Some("text") {
                            continue;
                        }
                        if let Some(text) = value.get("text").and_then(|v| v.as_str()) {
                            if !text.trim().is_empty() {
                                text_parts.push(text.to_string());
                            }
                        }
                    }
                    parts_by_message.insert(message_id, text_parts.join("\n"));
                }
            }
        }

        (messages_by_session, parts_by_message)
    }

    fn materialize(
        &self,
        descriptor: &SessionDescriptor,
        messages: &[MessageDescriptor],
        parts_by_message: &HashMap<String, String>,
    ) -> Option<SessionRecord> {
        let mut content = String::new();
        let mut message_count: u32 = 0;
        let mut first_human_title: Option<String> = None;

        for message in messages {
            let Some(text) = parts_by_message.get(&message.id) else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }
            match message.role.as_str() {
                "user" => {
                    message_count += 1;
                    push_human_line(&mut content, text);
                    if first_human_title.is_none() && text.trim().chars().count() > TITLE_SEED_MIN_CHARS {
                        first_human_title = Some(text.trim().to_string());
                    }
                }
                "assistant" => push_assistant_line(&mut content, text),
                _ => {}
            }
        }

        if message_count == 0 || content.trim().is_empty() {
            return None;
        }

        let title = first_human_title
            .map(|t| derive_title(&t))
            .unwrap_or_else(|| "Untitled session".to_string());
        let content = cap_content(content, self.content_cap_chars);
        let preview = derive_preview(&content, self.preview_cap_chars);
        let mtime = descriptor
            .created_ms
            .map(|ms| ms / 1000.0)
            .unwrap_or(descriptor.file_mtime);
        let timestamp = DateTime::<Utc>::from(
            SystemTime::UNIX_EPOCH + std::time::Duration::from_secs_f64(mtime.max(0.0)),
        );

        Some(SessionRecord {
            id: descriptor.id.clone(),
            agent: Agent::OpenCode,
            title,
            directory: descriptor.directory.clone(),
            timestamp,
            preview,
            content,
            message_count,
            mtime,
            yolo: false,
        })
    }
}

struct SessionDescriptor {
    id: String,
    directory: String,
    file_mtime: f64,
    created_ms: Option<f64>,
}

struct MessageDescriptor {
    id: String,
    role: String,
}

fn system_time_to_secs(t: SystemTime) -> f64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl Adapter for OpenCodeAdapter {
    fn name(&self) -> Agent {
        Agent::OpenCode
    }

    fn is_available(&self) -> bool {
        self.session_dir().map(|p| p.exists()).unwrap_or(false)
    }

    fn find_sessions_incremental(&self, known: &KnownMap) -> DiffResult {
        if !self.is_available() {
            let root = self.session_dir().unwrap_or_default();
            warn!(err = %ScanError::AdapterRootMissing { path: root }, "opencode adapter root missing, deleting known opencode sessions");
            let deleted_ids = known
                .iter()
                .filter(|(_, (_, agent))| *agent == Agent::OpenCode)
                .map(|(id, _)| id.clone())
                .collect();
            return DiffResult {
                upserts: Vec::new(),
                deleted_ids,
            };
        }

        let descriptors = self.scan_session_descriptors();
        let current_ids: std::collections::HashSet<&str> =
            descriptors.iter().map(|d| d.id.as_str()).collect();

        let deleted_ids = known
            .iter()
            .filter(|(id, (_, agent))| *agent == Agent::OpenCode && !current_ids.contains(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect();

        let effective_mtime = |d: &SessionDescriptor| d.created_ms.map(|ms| ms / 1000.0).unwrap_or(d.file_mtime);
        let sessions_to_parse: Vec<&SessionDescriptor> = descriptors
            .iter()
            .filter(|d| match known.get(&d.id) {
                Some((known_mtime, _)) => (effective_mtime(d) - known_mtime).abs() > MTIME_TOLERANCE_SECS,
                None => true,
            })
            .collect();

        if sessions_to_parse.is_empty() {
            return DiffResult {
                upserts: Vec::new(),
                deleted_ids,
            };
        }

        let (messages_by_session, parts_by_message) = self.build_indexes();
        let mut upserts = Vec::new();
        for descriptor in sessions_to_parse {
            let empty = Vec::new();
            let messages = messages_by_session.get(&descriptor.id).unwrap_or(&empty);
            if let Some(record) = self.materialize(descriptor, messages, &parts_by_message) {
                upserts.push(record);
            }
        }

        debug!(upserts = upserts.len(), deleted = deleted_ids.len(), "opencode incremental scan complete");

        DiffResult {
            upserts,
            deleted_ids,
        }
    }

    fn resume_command(&self, session: &SessionRecord, _yolo: bool) -> Vec<String> {
        vec![
            "opencode".to_string(),
            session.directory.clone(),
            "--session".to_string(),
            session.id.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_json(path: &Path, value: &serde_json::Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string(value).unwrap()).unwrap();
    }

    #[test]
    fn materializes_session_from_messages_and_parts() {
        let dir = tempdir().unwrap();
        let root = dir.path();

        write_json(
            &root.join("session/ses_1.json"),
            &serde_json::json!({"id": "ses_1", "directory": "/home/u/x", "time": {"created": 1_700_000_000_000i64}}),
        );
        write_json(
            &root.join("message/ses_1/msg_1.json"),
            &serde_json::json!({"id": "msg_1", "role": "user"}),
        );
        write_json(
            &root.join("message/ses_1/msg_2.json"),
            &serde_json::json!({"id": "msg_2", "role": "assistant"}),
        );
        write_json(
            &root.join("part/msg_1/part_1.json"),
            &serde_json::json!({"type": "text", "text": "please write a parser"}),
        );
        write_json(
            &root.join("part/msg_2/part_1.json"),
            &serde_json::json!({"type": "text", "text": "sure, here it is"}),
        );

        let adapter = OpenCodeAdapter::new(Some(root.to_path_buf()), 32 * 1024, 500);
        let sessions = adapter.find_sessions();
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.id, "ses_1");
        assert_eq!(s.directory, "/home/u/x");
        assert!(s.content.contains("» please write a parser"));
        assert!(s.content.contains("sure, here it is"));
        assert_eq!(s.message_count, 1);
    }

    #[test]
    fn unchanged_sessions_skip_index_rebuild_entirely() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write_json(
            &root.join("session/ses_1.json"),
            &serde_json::json!({"id": "ses_1", "directory": "/x", "time": {"created": 1_700_000_000_000i64}}),
        );

        let mut known = KnownMap::new();
        known.insert("ses_1".to_string(), (1_700_000_000.0, Agent::OpenCode));

        let adapter = OpenCodeAdapter::new(Some(root.to_path_buf()), 32 * 1024, 500);
        let diff = adapter.find_sessions_incremental(&known);
        assert!(diff.upserts.is_empty());
        assert!(diff.deleted_ids.is_empty());
    }
}
