//! Adapter B: Codex CLI.
//!
//! Source layout: a date-partitioned directory tree, one append-only JSONL
//! file per session, with typed records (`session_meta`, `turn_context`,
//! `response_item`, `event_msg`).

use crate::adapter::Adapter;
use crate::content::{cap_content, derive_preview, derive_title, push_assistant_line, push_human_line};
use crate::error::ScanError;
use crate::types::{Agent, DiffResult, KnownMap, SessionRecord};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MTIME_TOLERANCE_SECS: f64 = 0.001;
const TITLE_SEED_MIN_CHARS: usize = 10;

pub struct CodexAdapter {
    root: Option<PathBuf>,
    content_cap_chars: usize,
    preview_cap_chars: usize,
}

impl CodexAdapter {
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

    fn fallback_id(path: &Path) -> String {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown");
        match stem.split_once('-') {
            Some((_, rest)) => rest.to_string(),
            None => stem.to_string(),
        }
    }

    /// Cheap id-only peek: reads just the first line (the `session_meta`
    /// record carries the true id) instead of a full parse, falling back to
    /// the filename-derived id when the file is missing, empty, or the first
    /// line doesn't carry one.
    fn peek_session_id(path: &Path) -> String {
        let Ok(file) = fs::File::open(path) else {
            return Self::fallback_id(path);
        };
        let mut reader = BufReader::new(file);
        let mut first_line = String::new();
        if matches!(reader.read_line(&mut first_line), Ok(0) | Err(_)) {
            return Self::fallback_id(path);
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(first_line.trim()) else {
            return Self::fallback_id(path);
        };
        if value.get("type").and_then(|t| t.as_str()) == Some("session_meta") {
            if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
                return id.to_string();
            }
        }
        Self::fallback_id(path)
    }

    fn scan_files(&self) -> Vec<PathBuf> {
        let Some(root) = self.root_path() else {
            return Vec::new();
        };
        WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("jsonl"))
            .map(|e| e.path().to_path_buf())
            .collect()
    }

    fn parse_session(&self, path: &Path, mtime: f64) -> Option<(String, SessionRecord)> {
        let file = fs::File::open(path)
            .map_err(|e| warn!(err = %ScanError::file_unparseable(path, e), "codex session file unreadable"))
            .ok()?;
        let reader = BufReader::new(file);

        let mut id: Option<String> = None;
        let mut directory = String::new();
        let mut yolo = false;
        let mut content = String::new();
        let mut message_count: u32 = 0;
        let mut first_human_title: Option<String> = None;

        for (line_no, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(err = %ScanError::record_malformed(path, line_no, e.to_string()), "codex line unreadable");
                    continue;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: serde_json::Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    warn!(err = %ScanError::record_malformed(path, line_no, e.to_string()), "skipping malformed codex record");
                    continue;
                }
            };
            let entry_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");

            match entry_type {
                "session_meta" => {
                    if let Some(sid) = value.get("id").and_then(|v| v.as_str()) {
                        id = Some(sid.to_string());
                    }
                    if let Some(cwd) = value.get("cwd").and_then(|v| v.as_str()) {
                        directory = cwd.to_string();
                    }
                }
                "turn_context" => {
                    let never_approve = value.get("approval_policy").and_then(|v| v.as_str()) == Some("never");
                    let danger_sandbox = value
                        .get("sandbox_policy")
                        .and_then(|v| v.get("mode"))
                        .and_then(|v| v.as_str())
                        == Some("danger-full-access");
                    if never_approve || danger_sandbox {
                        yolo = true;
                    }
                }
                "event_msg" => {
                    if let Some(text) = value.get("user_message").and_then(|v| v.as_str()) {
                        if !text.trim().is_empty() {
                            message_count += 1;
                            push_human_line(&mut content, text);
                            if first_human_title.is_none() && text.trim().chars().count() > TITLE_SEED_MIN_CHARS {
                                first_human_title = Some(text.trim().to_string());
                            }
                        }
                    }
                    if let Some(text) = value.get("agent_reasoning").and_then(|v| v.as_str()) {
                        if !text.trim().is_empty() {
                            push_assistant_line(&mut content, text);
                        }
                    }
                }
                "response_item" => {
                    if let Some(text) = response_item_text(&value) {
                        if text.starts_with("<environment_context>") {
                            continue;
                        }
                        let role = value.get("role").and_then(|v| v.as_str()).unwrap_or("");
                        match role {
                            "user" => push_human_line(&mut content, &text),
                            "assistant" => push_assistant_line(&mut content, &text),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        if message_count == 0 || content.trim().is_empty() {
            return None;
        }

        let id = id.unwrap_or_else(|| Self::fallback_id(path));
        let title = first_human_title
            .map(|t| derive_title(&t))
            .unwrap_or_else(|| "Untitled session".to_string());
        let content = cap_content(content, self.content_cap_chars);
        let preview = derive_preview(&content, self.preview_cap_chars);
        let timestamp = DateTime::<Utc>::from(
            SystemTime::UNIX_EPOCH + std::time::Duration::from_secs_f64(mtime.max(0.0)),
        );

        Some((
            id.clone(),
            SessionRecord {
                id,
                agent: Agent::Codex,
                title,
                directory,
                timestamp,
                preview,
                content,
                message_count,
                mtime,
                yolo,
            },
        ))
    }
}

fn response_item_text(value: &serde_json::Value) -> Option<String> {
    let content = value.get("content")?;
    match content {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(parts) => {
            let joined: String = parts
                .iter()
                .filter_map(|p| {
                    p.get("text")
                        .or_else(|| p.get("input_text"))
                        .and_then(|t| t.as_str())
                })
                .collect::<Vec<_>>()
                .join("\n");
            if joined.trim().is_empty() {
                None
            } else {
                Some(joined)
            }
        }
        _ => None,
    }
}

fn system_time_to_secs(t: SystemTime) -> f64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl Adapter for CodexAdapter {
    fn name(&self) -> Agent {
        Agent::Codex
    }

    fn is_available(&self) -> bool {
        self.root_path().map(Path::exists).unwrap_or(false)
    }

    fn find_sessions_incremental(&self, known: &KnownMap) -> DiffResult {
        if !self.is_available() {
            let root = self.root_path().map(Path::to_path_buf).unwrap_or_default();
            warn!(err = %ScanError::AdapterRootMissing { path: root }, "codex adapter root missing, deleting known codex sessions");
            let deleted_ids = known
                .iter()
                .filter(|(_, (_, agent))| *agent == Agent::Codex)
                .map(|(id, _)| id.clone())
                .collect();
            return DiffResult {
                upserts: Vec::new(),
                deleted_ids,
            };
        }

        let files = self.scan_files();
        let mut current_ids = std::collections::HashSet::new();
        let mut upserts = Vec::new();

        for path in &files {
            let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(t) => system_time_to_secs(t),
                Err(e) => {
                    warn!(err = %ScanError::file_unparseable(path, e), "skipping unreadable codex session file");
                    continue;
                }
            };
            let cheap_id = Self::peek_session_id(path);
            let needs_parse = match known.get(&cheap_id) {
                Some((known_mtime, _)) => (mtime - known_mtime).abs() > MTIME_TOLERANCE_SECS,
                None => true,
            };

            if needs_parse {
                if let Some((id, record)) = self.parse_session(path, mtime) {
                    current_ids.insert(id);
                    upserts.push(record);
                }
            } else {
                current_ids.insert(cheap_id);
            }
        }

        let deleted_ids = known
            .iter()
            .filter(|(id, (_, agent))| *agent == Agent::Codex && !current_ids.contains(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect();

        debug!(upserts = upserts.len(), deleted = deleted_ids.len(), "codex incremental scan complete");

        DiffResult {
            upserts,
            deleted_ids,
        }
    }

    fn resume_command(&self, session: &SessionRecord, yolo: bool) -> Vec<String> {
        let mut argv = vec!["codex".to_string()];
        if yolo {
            argv.push("--dangerously-bypass-approvals-and-sandbox".to_string());
        }
        argv.push("resume".to_string());
        argv.push(session.id.clone());
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_session(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn extracts_id_directory_and_yolo_flag() {
        let dir = tempdir().unwrap();
        write_session(
            dir.path(),
            "rollout-2026-01-01.jsonl",
            &[
                r#"{"type":"session_meta","id":"abc123","cwd":"/home/u/repo"}"#,
                r#"{"type":"turn_context","approval_policy":"never"}"#,
                r#"{"type":"event_msg","user_message":"please refactor the auth module"}"#,
            ],
        );

        let adapter = CodexAdapter::new(Some(dir.path().to_path_buf()), 32 * 1024, 500);
        let sessions = adapter.find_sessions();
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.id, "abc123");
        assert_eq!(s.directory, "/home/u/repo");
        assert!(s.yolo);
    }

    #[test]
    fn missing_session_meta_id_falls_back_to_filename() {
        let dir = tempdir().unwrap();
        write_session(
            dir.path(),
            "rollout-2026-01-01-deadbeef.jsonl",
            &[r#"{"type":"event_msg","user_message":"hello there, a message"}"#],
        );

        let adapter = CodexAdapter::new(Some(dir.path().to_path_buf()), 32 * 1024, 500);
        let sessions = adapter.find_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "2026-01-01-deadbeef");
    }

    #[test]
    fn environment_context_response_items_are_ignored() {
        let dir = tempdir().unwrap();
        write_session(
            dir.path(),
            "rollout-x.jsonl",
            &[
                r#"{"type":"event_msg","user_message":"a normal human message here"}"#,
                r#"{"type":"response_item","role":"user","content":"<environment_context>junk</environment_context>"}"#,
            ],
        );
        let adapter = CodexAdapter::new(Some(dir.path().to_path_buf()), 32 * 1024, 500);
        let sessions = adapter.find_sessions();
        assert_eq!(sessions.len(), 1);
        assert!(!sessions[0].content.contains("environment_context"));
    }

    #[test]
    fn unchanged_mtime_with_known_session_meta_id_is_not_reparsed() {
        let dir = tempdir().unwrap();
        let path = write_session(
            dir.path(),
            "rollout-2026-01-01.jsonl",
            &[
                r#"{"type":"session_meta","id":"abc123","cwd":"/home/u/repo"}"#,
                r#"{"type":"event_msg","user_message":"please refactor the auth module"}"#,
            ],
        );
        let mtime = system_time_to_secs(fs::metadata(&path).unwrap().modified().unwrap());

        let mut known = KnownMap::new();
        known.insert("abc123".to_string(), (mtime, Agent::Codex));

        let adapter = CodexAdapter::new(Some(dir.path().to_path_buf()), 32 * 1024, 500);
        let diff = adapter.find_sessions_incremental(&known);
        assert!(diff.upserts.is_empty(), "a known, unchanged session must not be re-parsed");
        assert!(diff.deleted_ids.is_empty());
    }

    #[test]
    fn resume_command_injects_bypass_flag_only_when_yolo() {
        let adapter = CodexAdapter::new(None, 32 * 1024, 500);
        let session = SessionRecord {
            id: "abc".into(),
            agent: Agent::Codex,
            title: "t".into(),
            directory: "/tmp".into(),
            timestamp: chrono::Utc::now(),
            preview: String::new(),
            content: String::new(),
            message_count: 1,
            mtime: 0.0,
            yolo: false,
        };
        assert_eq!(adapter.resume_command(&session, false), vec!["codex", "resume", "abc"]);
        assert_eq!(
            adapter.resume_command(&session, true),
            vec!["codex", "--dangerously-bypass-approvals-and-sandbox", "resume", "abc"]
        );
    }
}
