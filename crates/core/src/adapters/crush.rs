//! Adapter D: Crush.
//!
//! Source layout: a top-level directory-map file (`projects.json`) maps each
//! known project directory to the data directory holding that project's own
//! `crush.db` SQLite database. Sessions live in a `sessions` table joined to
//! a `messages` table, whose bodies are themselves typed parts
//! (`text`/`tool_result`/`tool_call`).

use crate::adapter::Adapter;
use crate::content::{cap_content, derive_preview, derive_title, push_assistant_line, push_human_line};
use crate::error::ScanError;
use crate::types::{Agent, DiffResult, KnownMap, SessionRecord};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

const MTIME_TOLERANCE_SECS: f64 = 0.001;
const TITLE_SEED_MIN_CHARS: usize = 5;
/// `updated_at` values above this are milliseconds, not seconds.
const MS_THRESHOLD: f64 = 1e11;
/// Tool-result bodies longer than this contribute no search noise; dropped
/// entirely rather than truncated.
const TOOL_RESULT_MAX_CHARS: usize = 500;
const TOOL_RESULT_PREVIEW_CHARS: usize = 200;

pub struct CrushAdapter {
    projects_file: Option<PathBuf>,
    content_cap_chars: usize,
    preview_cap_chars: usize,
    timeout: Duration,
}

impl CrushAdapter {
    pub fn new(
        projects_file: Option<PathBuf>,
        content_cap_chars: usize,
        preview_cap_chars: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            projects_file,
            content_cap_chars,
            preview_cap_chars,
            timeout,
        }
    }

    /// `{project_directory -> path to the project's data directory}`.
    fn project_map(&self) -> HashMap<String, PathBuf> {
        let Some(path) = &self.projects_file else {
            return HashMap::new();
        };
        let Ok(raw) = fs::read_to_string(path) else {
            return HashMap::new();
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            return HashMap::new();
        };
        let Some(obj) = value.as_object() else {
            return HashMap::new();
        };

        let mut out = HashMap::new();
        for (directory, entry) in obj {
            let data_dir = match entry {
                serde_json::Value::String(s) => Some(PathBuf::from(s)),
                serde_json::Value::Object(o) => o
                    .get("data_dir")
                    .or_else(|| o.get("dataDir"))
                    .and_then(|v| v.as_str())
                    .map(PathBuf::from),
                _ => None,
            };
            if let Some(data_dir) = data_dir {
                out.insert(directory.clone(), data_dir);
            }
        }
        out
    }

    fn open_db(&self, data_dir: &Path) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(data_dir.join("crush.db"))?;
        conn.busy_timeout(self.timeout)?;
        Ok(conn)
    }

    fn scan_project(&self, directory: &str, data_dir: &Path) -> Vec<(String, f64)> {
        let conn = match self.open_db(data_dir) {
            Ok(c) => c,
            Err(e) => {
                let err = ScanError::RelationalError {
                    path: data_dir.to_path_buf(),
                    source: e,
                };
                warn!(directory, %err, "crush project database unreachable");
                return Vec::new();
            }
        };
        let result = (|| -> Result<Vec<(String, f64)>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.updated_at \
                 FROM sessions s \
                 WHERE (SELECT COUNT(*) FROM messages m WHERE m.session_id = s.id) > 0 \
                 ORDER BY s.updated_at DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    let id: String = row.get(0)?;
                    let raw_updated_at: f64 = row.get(1)?;
                    Ok((id, normalize_updated_at(raw_updated_at)))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })();

        match result {
            Ok(rows) => rows,
            Err(e) => {
                let err = ScanError::RelationalError {
                    path: data_dir.to_path_buf(),
                    source: e,
                };
                warn!(directory, %err, "crush project query failed");
                Vec::new()
            }
        }
    }

    fn load_session(
        &self,
        conn: &Connection,
        session_id: &str,
        directory: &str,
        updated_at: f64,
    ) -> Option<SessionRecord> {
        let stored_title: Option<String> = conn
            .query_row(
                "SELECT title FROM sessions WHERE id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .ok();

        let mut stmt = conn
            .prepare(
                "SELECT role, parts, created_at FROM messages \
                 WHERE session_id = ?1 ORDER BY created_at ASC",
            )
            .ok()?;
        let rows: Vec<(String, String, f64)> = stmt
            .query_map([session_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .ok()?
            .filter_map(Result::ok)
            .collect();

        let mut content = String::new();
        let mut message_count: u32 = 0;
        let mut first_human_title: Option<String> = None;

        for (role, parts_json, _created_at) in &rows {
            let text = render_parts(parts_json);
            if text.trim().is_empty() {
                continue;
            }
            match role.as_str() {
                "user" => {
                    message_count += 1;
                    push_human_line(&mut content, &text);
                    if first_human_title.is_none() && text.trim().chars().count() > TITLE_SEED_MIN_CHARS {
                        first_human_title = Some(text.trim().to_string());
                    }
                }
                "assistant" => push_assistant_line(&mut content, &text),
                _ => {}
            }
        }

        if message_count == 0 || content.trim().is_empty() {
            return None;
        }

        let title = stored_title
            .filter(|t| !t.trim().is_empty())
            .or(first_human_title)
            .map(|t| derive_title(&t))
            .unwrap_or_else(|| "Untitled session".to_string());
        let content = cap_content(content, self.content_cap_chars);
        let preview = derive_preview(&content, self.preview_cap_chars);
        let timestamp = DateTime::<Utc>::from(
            SystemTime::UNIX_EPOCH + std::time::Duration::from_secs_f64(updated_at.max(0.0)),
        );

        Some(SessionRecord {
            id: session_id.to_string(),
            agent: Agent::Crush,
            title,
            directory: directory.to_string(),
            timestamp,
            preview,
            content,
            message_count,
            mtime: updated_at,
            yolo: false,
        })
    }
}

fn normalize_updated_at(raw: f64) -> f64 {
    if raw > MS_THRESHOLD {
        raw / 1000.0
    } else {
        raw
    }
}

/// Render a JSON-encoded array of typed message parts into display text.
fn render_parts(parts_json: &str) -> String {
    let Ok(serde_json::Value::Array(parts)) = serde_json::from_str::<serde_json::Value>(parts_json) else {
        return String::new();
    };
    let mut out = Vec::new();
    for part in parts {
        let part_type = part.get("type").and_then(|t| t.as_str()).unwrap_or("");
        match part_type {
            "text" => {
                if let Some(text) = part.get("text").and_then(|v| v.as_str()) {
                    out.push(text.to_string());
                }
            }
            "tool_result" => {
                let name = part.get("name").and_then(|v| v.as_str()).unwrap_or("tool");
                let body = part.get("content").and_then(|v| v.as_str()).unwrap_or("");
                if body.chars().count() < TOOL_RESULT_MAX_CHARS {
                    let preview: String = body.chars().take(TOOL_RESULT_PREVIEW_CHARS).collect();
                    out.push(format!("[{name}]: {preview}"));
                }
            }
            "tool_call" => {
                let name = part.get("name").and_then(|v| v.as_str()).unwrap_or("tool");
                out.push(format!("[calling {name}]"));
            }
            _ => {}
        }
    }
    out.join("\n")
}

impl Adapter for CrushAdapter {
    fn name(&self) -> Agent {
        Agent::Crush
    }

    fn is_available(&self) -> bool {
        self.projects_file.as_deref().map(Path::exists).unwrap_or(false)
    }

    fn find_sessions_incremental(&self, known: &KnownMap) -> DiffResult {
        if !self.is_available() {
            let root = self.projects_file.clone().unwrap_or_default();
            warn!(err = %ScanError::AdapterRootMissing { path: root }, "crush adapter root missing, deleting known crush sessions");
            let deleted_ids = known
                .iter()
                .filter(|(_, (_, agent))| *agent == Agent::Crush)
                .map(|(id, _)| id.clone())
                .collect();
            return DiffResult {
                upserts: Vec::new(),
                deleted_ids,
            };
        }

        let projects = self.project_map();
        let mut current_ids = std::collections::HashSet::new();
        let mut upserts = Vec::new();

        for (directory, data_dir) in &projects {
            let sessions = self.scan_project(directory, data_dir);
            let conn = match self.open_db(data_dir) {
                Ok(c) => c,
                Err(e) => {
                    let err = ScanError::RelationalError {
                        path: data_dir.to_path_buf(),
                        source: e,
                    };
                    warn!(directory, %err, "crush project unreachable, keeping previous index state");
                    continue;
                }
            };

            for (id, updated_at) in sessions {
                current_ids.insert(id.clone());
                let needs_parse = match known.get(&id) {
                    Some((known_mtime, _)) => (updated_at - known_mtime).abs() > MTIME_TOLERANCE_SECS,
                    None => true,
                };
                if needs_parse {
                    if let Some(record) = self.load_session(&conn, &id, directory, updated_at) {
                        upserts.push(record);
                    }
                }
            }
        }

        let deleted_ids = known
            .iter()
            .filter(|(id, (_, agent))| *agent == Agent::Crush && !current_ids.contains(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect();

        DiffResult {
            upserts,
            deleted_ids,
        }
    }

    fn resume_command(&self, _session: &SessionRecord, _yolo: bool) -> Vec<String> {
        vec!["crush".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_db(path: &Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE sessions (id TEXT PRIMARY KEY, title TEXT, updated_at REAL);
             CREATE TABLE messages (id TEXT PRIMARY KEY, session_id TEXT, role TEXT, parts TEXT, created_at REAL);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn normalize_updated_at_detects_milliseconds() {
        assert_eq!(normalize_updated_at(1_700_000_000.0), 1_700_000_000.0);
        assert_eq!(normalize_updated_at(1_700_000_000_000.0), 1_700_000_000.0);
    }

    #[test]
    fn renders_text_tool_call_and_short_tool_result_parts() {
        let parts = serde_json::json!([
            {"type": "text", "text": "doing the thing"},
            {"type": "tool_call", "name": "Read"},
            {"type": "tool_result", "name": "Read", "content": "file contents"}
        ])
        .to_string();
        let rendered = render_parts(&parts);
        assert!(rendered.contains("doing the thing"));
        assert!(rendered.contains("[calling Read]"));
        assert!(rendered.contains("[Read]: file contents"));
    }

    #[test]
    fn long_tool_result_is_dropped_not_truncated() {
        let long_body = "x".repeat(600);
        let parts = serde_json::json!([
            {"type": "tool_result", "name": "Bash", "content": long_body}
        ])
        .to_string();
        assert_eq!(render_parts(&parts), "");
    }

    #[test]
    fn end_to_end_session_load_from_sqlite() {
        let dir = tempdir().unwrap();
        let conn = make_db(&dir.path().join("crush.db"));
        conn.execute(
            "INSERT INTO sessions (id, title, updated_at) VALUES ('s1', '', 1700000000.0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO messages (id, session_id, role, parts, created_at) VALUES \
             ('m1', 's1', 'user', '[{\"type\":\"text\",\"text\":\"please fix this bug\"}]', 1.0)",
            [],
        )
        .unwrap();

        let adapter = CrushAdapter::new(None, 32 * 1024, 500, Duration::from_secs(5));
        let record = adapter
            .load_session(&conn, "s1", "/home/u/proj", 1700000000.0)
            .unwrap();
        assert_eq!(record.title, "please fix this bug");
        assert_eq!(record.message_count, 1);
    }

    #[test]
    fn session_with_no_human_message_is_dropped() {
        let dir = tempdir().unwrap();
        let conn = make_db(&dir.path().join("crush.db"));
        conn.execute(
            "INSERT INTO sessions (id, title, updated_at) VALUES ('s1', '', 1700000000.0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO messages (id, session_id, role, parts, created_at) VALUES \
             ('m1', 's1', 'assistant', '[{\"type\":\"text\",\"text\":\"hello\"}]', 1.0)",
            [],
        )
        .unwrap();

        let adapter = CrushAdapter::new(None, 32 * 1024, 500, Duration::from_secs(5));
        assert!(adapter.load_session(&conn, "s1", "/x", 1700000000.0).is_none());
    }
}
