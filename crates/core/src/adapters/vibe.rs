//! Adapter F: Vibe.
//!
//! Source layout: a single JSON descriptor per session with an embedded
//! `messages` array, named `session_*.json`.

use crate::adapter::Adapter;
use crate::content::{cap_content, derive_preview, derive_title, push_assistant_line, push_human_line};
use crate::error::ScanError;
use crate::types::{Agent, DiffResult, KnownMap, SessionRecord};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

const MTIME_TOLERANCE_SECS: f64 = 0.001;

pub struct VibeAdapter {
    root: Option<PathBuf>,
    content_cap_chars: usize,
    preview_cap_chars: usize,
}

impl VibeAdapter {
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

    fn scan_files(&self) -> Vec<PathBuf> {
        let Some(root) = self.root_path() else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(root) else {
            return Vec::new();
        };
        entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|s| s.starts_with("session_"))
                    .unwrap_or(false)
                    && p.extension().and_then(|e| e.to_str()) == Some("json")
            })
            .collect()
    }

    fn parse_session(&self, path: &Path, file_mtime: f64) -> Option<(String, SessionRecord)> {
        let raw = fs::read_to_string(path)
            .map_err(|e| warn!(err = %ScanError::file_unparseable(path, e), "vibe session file unreadable"))
            .ok()?;
        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(err = %ScanError::record_malformed(path, 0, e.to_string()), "skipping malformed vibe session file");
                return None;
            }
        };

        let metadata = value.get("metadata");
        let id = metadata
            .and_then(|m| m.get("session_id"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string());

        let directory = metadata
            .and_then(|m| m.get("environment"))
            .and_then(|e| e.get("working_directory"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let yolo = metadata
            .and_then(|m| m.get("auto_approve"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mtime = metadata
            .and_then(|m| m.get("start_time"))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp() as f64)
            .unwrap_or(file_mtime);

        let messages = value.get("messages").and_then(|v| v.as_array());
        let mut content = String::new();
        let mut message_count: u32 = 0;
        let mut title: Option<String> = None;
        let mut seen_first_message = false;

        if let Some(messages) = messages {
            for message in messages {
                let role = message.get("role").and_then(|v| v.as_str()).unwrap_or("");
                if role == "system" {
                    continue;
                }
                let raw_content = message.get("content");

                if !seen_first_message && role == "user" {
                    seen_first_message = true;
                    title = Some(match raw_content {
                        Some(serde_json::Value::String(s)) => derive_title(s.trim()),
                        _ => "Vibe session".to_string(),
                    });
                }

                let text = match raw_content {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(serde_json::Value::Array(parts)) => parts
                        .iter()
                        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                        .collect::<Vec<_>>()
                        .join("\n"),
                    _ => String::new(),
                };
                if text.trim().is_empty() {
                    continue;
                }

                match role {
                    "user" => {
                        message_count += 1;
                        push_human_line(&mut content, &text);
                    }
                    "assistant" => push_assistant_line(&mut content, &text),
                    _ => {}
                }
            }
        }

        if message_count == 0 || content.trim().is_empty() {
            return None;
        }

        let title = title.unwrap_or_else(|| "Vibe session".to_string());
        let content = cap_content(content, self.content_cap_chars);
        let preview = derive_preview(&content, self.preview_cap_chars);
        let timestamp = DateTime::<Utc>::from(
            SystemTime::UNIX_EPOCH + std::time::Duration::from_secs_f64(mtime.max(0.0)),
        );

        Some((
            id.clone(),
            SessionRecord {
                id,
                agent: Agent::Vibe,
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

fn system_time_to_secs(t: SystemTime) -> f64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl Adapter for VibeAdapter {
    fn name(&self) -> Agent {
        Agent::Vibe
    }

    fn is_available(&self) -> bool {
        self.root_path().map(Path::exists).unwrap_or(false)
    }

    fn find_sessions_incremental(&self, known: &KnownMap) -> DiffResult {
        if !self.is_available() {
            let root = self.root_path().map(Path::to_path_buf).unwrap_or_default();
            warn!(err = %ScanError::AdapterRootMissing { path: root }, "vibe adapter root missing, deleting known vibe sessions");
            let deleted_ids = known
                .iter()
                .filter(|(_, (_, agent))| *agent == Agent::Vibe)
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
            let file_mtime = match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(t) => system_time_to_secs(t),
                Err(e) => {
                    warn!(err = %ScanError::file_unparseable(path, e), "skipping unreadable vibe session file");
                    continue;
                }
            };
            // We need to parse once per changed file regardless, since the id
            // and logical timestamp both live inside the JSON body.
            if let Some((id, record)) = self.parse_session(path, file_mtime) {
                let needs_upsert = match known.get(&id) {
                    Some((known_mtime, _)) => (record.mtime - known_mtime).abs() > MTIME_TOLERANCE_SECS,
                    None => true,
                };
                current_ids.insert(id);
                if needs_upsert {
                    upserts.push(record);
                }
            }
        }

        let deleted_ids = known
            .iter()
            .filter(|(id, (_, agent))| *agent == Agent::Vibe && !current_ids.contains(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect();

        debug!(upserts = upserts.len(), deleted = deleted_ids.len(), "vibe incremental scan complete");

        DiffResult {
            upserts,
            deleted_ids,
        }
    }

    fn resume_command(&self, session: &SessionRecord, yolo: bool) -> Vec<String> {
        let mut argv = vec!["vibe".to_string()];
        if yolo {
            argv.push("--auto-approve".to_string());
        }
        argv.push("--resume".to_string());
        argv.push(session.id.clone());
        argv
    }
}
