//! Adapter A: Claude Code.
//!
//! Source layout: project-hashed folders under the configured root, each
//! containing one append-only JSONL file per session. Files whose name
//! begins with `agent-` are sub-agent transcripts, not top-level sessions,
//! and are skipped entirely.

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

pub struct ClaudeAdapter {
    root: Option<PathBuf>,
    content_cap_chars: usize,
    preview_cap_chars: usize,
}

impl ClaudeAdapter {
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

    fn scan_files(&self) -> Vec<(String, PathBuf, f64)> {
        let Some(root) = self.root_path() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s,
                None => continue,
            };
            if stem.starts_with("agent-") {
                continue;
            }
            let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(t) => system_time_to_secs(t),
                Err(e) => {
                    warn!(err = %ScanError::file_unparseable(path, e), "skipping unreadable claude session file");
                    continue;
                }
            };
            out.push((stem.to_string(), path.to_path_buf(), mtime));
        }
        out
    }

    fn parse_session(&self, id: &str, path: &Path, mtime: f64) -> Option<SessionRecord> {
        let file = fs::File::open(path)
            .map_err(|e| warn!(err = %ScanError::file_unparseable(path, e), "claude session file unreadable"))
            .ok()?;
        let reader = BufReader::new(file);

        let mut content = String::new();
        let mut message_count: u32 = 0;
        let mut directory = String::new();
        let mut summary_title: Option<String> = None;
        let mut first_human_title: Option<String> = None;

        for (line_no, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(err = %ScanError::record_malformed(path, line_no, e.to_string()), "claude line unreadable");
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
                    warn!(err = %ScanError::record_malformed(path, line_no, e.to_string()), "skipping malformed claude record");
                    continue;
                }
            };
            let entry_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");

            match entry_type {
                "summary" => {
                    if let Some(text) = value.get("summary").and_then(|v| v.as_str()) {
                        if !text.trim().is_empty() {
                            summary_title = Some(text.trim().to_string());
                        }
                    }
                }
                "user" => {
                    if value.get("isMeta").and_then(|v| v.as_bool()) == Some(true) {
                        continue;
                    }
                    if directory.is_empty() {
                        if let Some(cwd) = value.get("cwd").and_then(|v| v.as_str()) {
                            directory = cwd.to_string();
                        }
                    }
                    let Some(msg_content) = value.get("message").and_then(|m| m.get("content")) else {
                        continue;
                    };
                    let text = match msg_content {
                        serde_json::Value::String(s) => {
                            if starts_with_command_tag(s) {
                                None
                            } else {
                                Some(s.clone())
                            }
                        }
                        serde_json::Value::Array(parts) => {
                            let first_is_tool_result = parts
                                .first()
                                .and_then(|p| p.get("type"))
                                .and_then(|t| t.as_str())
                                == Some("tool_result");
                            if first_is_tool_result {
                                None
                            } else {
                                let joined: String = parts
                                    .iter()
                                    .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
                                    .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                                    .collect::<Vec<_>>()
                                    .join("\n");
                                if joined.trim().is_empty() {
                                    None
                                } else {
                                    Some(joined)
                                }
                            }
                        }
                        _ => None,
                    };
                    if let Some(text) = text {
                        message_count += 1;
                        push_human_line(&mut content, &text);
                        if first_human_title.is_none() && text.trim().chars().count() > TITLE_SEED_MIN_CHARS {
                            first_human_title = Some(text.trim().to_string());
                        }
                    }
                }
                "assistant" => {
                    if let Some(msg_content) = value.get("message").and_then(|m| m.get("content")) {
                        let text = extract_assistant_text(msg_content);
                        if !text.trim().is_empty() {
                            push_assistant_line(&mut content, &text);
                        }
                    }
                }
                _ => {}
            }
        }

        if message_count == 0 || content.trim().is_empty() {
            return None;
        }

        let title = summary_title
            .or(first_human_title)
            .map(|t| derive_title(&t))
            .unwrap_or_else(|| "Untitled session".to_string());

        let content = cap_content(content, self.content_cap_chars);
        let preview = derive_preview(&content, self.preview_cap_chars);
        let timestamp = DateTime::<Utc>::from(
            SystemTime::UNIX_EPOCH + std::time::Duration::from_secs_f64(mtime.max(0.0)),
        );

        Some(SessionRecord {
            id: id.to_string(),
            agent: Agent::Claude,
            title,
            directory,
            timestamp,
            preview,
            content,
            message_count,
            mtime,
            yolo: false,
        })
    }
}

fn starts_with_command_tag(s: &str) -> bool {
    let trimmed = s.trim_start();
    trimmed.starts_with("<command") || trimmed.starts_with("<local-command")
}

fn extract_assistant_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn system_time_to_secs(t: SystemTime) -> f64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl Adapter for ClaudeAdapter {
    fn name(&self) -> Agent {
        Agent::Claude
    }

    fn is_available(&self) -> bool {
        self.root_path().map(Path::exists).unwrap_or(false)
    }

    fn find_sessions_incremental(&self, known: &KnownMap) -> DiffResult {
        if !self.is_available() {
            let root = self.root_path().map(Path::to_path_buf).unwrap_or_default();
            warn!(err = %ScanError::AdapterRootMissing { path: root }, "claude adapter root missing, deleting known claude sessions");
            let deleted_ids = known
                .iter()
                .filter(|(_, (_, agent))| *agent == Agent::Claude)
                .map(|(id, _)| id.clone())
                .collect();
            return DiffResult {
                upserts: Vec::new(),
                deleted_ids,
            };
        }

        let current = self.scan_files();
        let current_ids: std::collections::HashSet<&str> =
            current.iter().map(|(id, _, _)| id.as_str()).collect();

        let mut upserts = Vec::new();
        for (id, path, mtime) in &current {
            let needs_parse = match known.get(id) {
                Some((known_mtime, _)) => (mtime - known_mtime).abs() > MTIME_TOLERANCE_SECS,
                None => true,
            };
            if needs_parse {
                if let Some(record) = self.parse_session(id, path, *mtime) {
                    upserts.push(record);
                }
            }
        }

        let deleted_ids = known
            .iter()
            .filter(|(id, (_, agent))| *agent == Agent::Claude && !current_ids.contains(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect();

        debug!(upserts = upserts.len(), deleted = deleted_ids.len(), "claude incremental scan complete");

        DiffResult {
            upserts,
            deleted_ids,
        }
    }

    fn resume_command(&self, session: &SessionRecord, _yolo: bool) -> Vec<String> {
        vec!["claude".to_string(), "--resume".to_string(), session.id.clone()]
    }
}
