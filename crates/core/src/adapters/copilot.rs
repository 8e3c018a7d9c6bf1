//! Adapter C: GitHub Copilot CLI.
//!
//! Source layout: a flat directory of one append-only JSONL file per
//! session, with typed records (`session.start`, `session.info`,
//! `user.message`, `assistant.message`).

use crate::adapter::Adapter;
use crate::content::{cap_content, derive_preview, derive_title, push_assistant_line, push_human_line};
use crate::error::ScanError;
use crate::types::{Agent, DiffResult, KnownMap, SessionRecord};
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MTIME_TOLERANCE_SECS: f64 = 0.001;
const TITLE_SEED_MIN_CHARS: usize = 10;

pub struct CopilotAdapter {
    root: Option<PathBuf>,
    content_cap_chars: usize,
    preview_cap_chars: usize,
}

impl CopilotAdapter {
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
        WalkDir::new(root)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("jsonl"))
            .map(|e| e.path().to_path_buf())
            .collect()
    }

    fn parse_session(&self, path: &Path, mtime: f64, folder_regex: &Regex) -> Option<(String, SessionRecord)> {
        let file = fs::File::open(path)
            .map_err(|e| warn!(err = %ScanError::file_unparseable(path, e), "copilot session file unreadable"))
            .ok()?;
        let reader = BufReader::new(file);

        let mut id: Option<String> = None;
        let mut directory = String::new();
        let mut content = String::new();
        let mut message_count: u32 = 0;
        let mut first_human_title: Option<String> = None;

        for (line_no, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!(err = %ScanError::record_malformed(path, line_no, e.to_string()), "copilot line unreadable");
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
                    warn!(err = %ScanError::record_malformed(path, line_no, e.to_string()), "skipping malformed copilot record");
                    continue;
                }
            };
            let entry_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");

            match entry_type {
                "session.start" => {
                    if let Some(sid) = value
                        .get("data")
                        .and_then(|d| d.get("sessionId"))
                        .and_then(|v| v.as_str())
                    {
                        id = Some(sid.to_string());
                    }
                }
                "session.info" => {
                    let is_folder_trust = value
                        .get("data")
                        .and_then(|d| d.get("infoType"))
                        .and_then(|v| v.as_str())
                        == Some("folder_trust");
                    if is_folder_trust {
                        if let Some(message) = value.get("message").and_then(|v| v.as_str()) {
                            if let Some(caps) = folder_regex.captures(message) {
                                if let Some(folder) = caps.get(1) {
                                    directory = folder.as_str().to_string();
                                }
                            }
                        }
                    }
                }
                "user.message" => {
                    if let Some(text) = value.get("data").and_then(|d| d.get("content")).and_then(|v| v.as_str()) {
                        if !text.trim().is_empty() {
                            message_count += 1;
                            push_human_line(&mut content, text);
                            if first_human_title.is_none() && text.trim().chars().count() > TITLE_SEED_MIN_CHARS {
                                first_human_title = Some(text.trim().to_string());
                            }
                        }
                    }
                }
                "assistant.message" => {
                    if let Some(text) = value.get("data").and_then(|d| d.get("content")).and_then(|v| v.as_str()) {
                        if !text.trim().is_empty() {
                            push_assistant_line(&mut content, text);
                        }
                    }
                }
                _ => {}
            }
        }

        if message_count == 0 || content.trim().is_empty() {
            return None;
        }

        let id = id.unwrap_or_else(|| {
            path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string()
        });
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
                agent: Agent::CopilotCli,
                title,
                directory,
                timestamp,
                preview,
                content,
                message_count,
                mtime,
                yolo: false,
            },
        ))
    }

    /// Cheap id-only peek: reads just the first line (the `session.start`
    /// record carries the true `data.sessionId`) instead of a full parse,
    /// falling back to the filename stem when it isn't there.
    fn cheap_id(path: &Path) -> String {
        let fallback = || path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();
        let Ok(file) = fs::File::open(path) else {
            return fallback();
        };
        let mut reader = BufReader::new(file);
        let mut first_line = String::new();
        if matches!(reader.read_line(&mut first_line), Ok(0) | Err(_)) {
            return fallback();
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(first_line.trim()) else {
            return fallback();
        };
        if value.get("type").and_then(|t| t.as_str()) == Some("session.start") {
            if let Some(id) = value.get("data").and_then(|d| d.get("sessionId")).and_then(|v| v.as_str()) {
                return id.to_string();
            }
        }
        fallback()
    }
}

fn system_time_to_secs(t: SystemTime) -> f64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl Adapter for CopilotAdapter {
    fn name(&self) -> Agent {
        Agent::CopilotCli
    }

    fn is_available(&self) -> bool {
        self.root_path().map(Path::exists).unwrap_or(false)
    }

    fn find_sessions_incremental(&self, known: &KnownMap) -> DiffResult {
        if !self.is_available() {
            let root = self.root_path().map(Path::to_path_buf).unwrap_or_default();
            warn!(err = %ScanError::AdapterRootMissing { path: root }, "copilot adapter root missing, deleting known copilot sessions");
            let deleted_ids = known
                .iter()
                .filter(|(_, (_, agent))| *agent == Agent::CopilotCli)
                .map(|(id, _)| id.clone())
                .collect();
            return DiffResult {
                upserts: Vec::new(),
                deleted_ids,
            };
        }

        let folder_regex = Regex::new(r"Folder (/\S+)").expect("static regex is valid");
        let files = self.scan_files();
        let mut current_ids = std::collections::HashSet::new();
        let mut upserts = Vec::new();

        for path in &files {
            let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(t) => system_time_to_secs(t),
                Err(e) => {
                    warn!(err = %ScanError::file_unparseable(path, e), "skipping unreadable copilot session file");
                    continue;
                }
            };
            let cheap_id = Self::cheap_id(path);
            let needs_parse = match known.get(&cheap_id) {
                Some((known_mtime, _)) => (mtime - known_mtime).abs() > MTIME_TOLERANCE_SECS,
                None => true,
            };

            if needs_parse {
                if let Some((id, record)) = self.parse_session(path, mtime, &folder_regex) {
                    current_ids.insert(id);
                    upserts.push(record);
                }
            } else {
                current_ids.insert(cheap_id);
            }
        }

        let deleted_ids = known
            .iter()
            .filter(|(id, (_, agent))| *agent == Agent::CopilotCli && !current_ids.contains(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect();

        debug!(upserts = upserts.len(), deleted = deleted_ids.len(), "copilot incremental scan complete");

        DiffResult {
            upserts,
            deleted_ids,
        }
    }

    fn resume_command(&self, session: &SessionRecord, yolo: bool) -> Vec<String> {
        let mut argv = vec!["copilot".to_string()];
        if yolo {
            argv.push("--allow-all-tools".to_string());
            argv.push("--allow-all-paths".to_string());
        }
        argv.push("--resume".to_string());
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
    fn extracts_session_id_and_directory_from_folder_trust_message() {
        let dir = tempdir().unwrap();
        write_session(
            dir.path(),
            "session1.jsonl",
            &[
                r#"{"type":"session.start","data":{"sessionId":"sess-42"}}"#,
                r#"{"type":"session.info","data":{"infoType":"folder_trust"},"message":"Folder /home/u/proj is trusted"}"#,
                r#"{"type":"user.message","data":{"content":"please add a new endpoint"}}"#,
            ],
        );

        let adapter = CopilotAdapter::new(Some(dir.path().to_path_buf()), 32 * 1024, 500);
        let sessions = adapter.find_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "sess-42");
        assert_eq!(sessions[0].directory, "/home/u/proj");
    }

    #[test]
    fn unchanged_mtime_with_known_session_id_is_not_reparsed() {
        let dir = tempdir().unwrap();
        let path = write_session(
            dir.path(),
            "session1.jsonl",
            &[
                r#"{"type":"session.start","data":{"sessionId":"sess-42"}}"#,
                r#"{"type":"user.message","data":{"content":"please add a new endpoint"}}"#,
            ],
        );
        let mtime = system_time_to_secs(fs::metadata(&path).unwrap().modified().unwrap());

        let mut known = KnownMap::new();
        known.insert("sess-42".to_string(), (mtime, Agent::CopilotCli));

        let adapter = CopilotAdapter::new(Some(dir.path().to_path_buf()), 32 * 1024, 500);
        let diff = adapter.find_sessions_incremental(&known);
        assert!(diff.upserts.is_empty(), "a known, unchanged session must not be re-parsed");
        assert!(diff.deleted_ids.is_empty());
    }

    #[test]
    fn yolo_flags_only_injected_when_caller_requests() {
        let adapter = CopilotAdapter::new(None, 32 * 1024, 500);
        let session = SessionRecord {
            id: "x".into(),
            agent: Agent::CopilotCli,
            title: "t".into(),
            directory: String::new(),
            timestamp: Utc::now(),
            preview: String::new(),
            content: String::new(),
            message_count: 1,
            mtime: 0.0,
            yolo: false,
        };
        assert_eq!(adapter.resume_command(&session, false), vec!["copilot", "--resume", "x"]);
        assert_eq!(
            adapter.resume_command(&session, true),
            vec!["copilot", "--allow-all-tools", "--allow-all-paths", "--resume", "x"]
        );
    }
}
