//! Plain configuration, constructed once by the embedder. Never read from
//! process-wide or environment state — each adapter takes its root as a
//! constructor argument, defaulting to the standard per-user location.

use crate::paths;
use std::path::PathBuf;
use std::time::Duration;

/// Default cap on `content` before it's handed to the index.
pub const DEFAULT_CONTENT_CAP_CHARS: usize = 32 * 1024;
/// Fixed by the specification: `preview` is always capped at 500 chars.
pub const PREVIEW_CAP_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub claude_root: Option<PathBuf>,
    pub codex_root: Option<PathBuf>,
    pub copilot_root: Option<PathBuf>,
    pub crush_projects_file: Option<PathBuf>,
    pub opencode_root: Option<PathBuf>,
    pub vibe_root: Option<PathBuf>,

    pub index_root: Option<PathBuf>,
    pub content_cap_chars: usize,
    pub preview_cap_chars: usize,
    pub relational_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            claude_root: None,
            codex_root: None,
            copilot_root: None,
            crush_projects_file: None,
            opencode_root: None,
            vibe_root: None,
            index_root: None,
            content_cap_chars: DEFAULT_CONTENT_CAP_CHARS,
            preview_cap_chars: PREVIEW_CAP_CHARS,
            relational_timeout: Duration::from_secs(5),
        }
    }
}

impl ScanConfig {
    pub fn claude_root(&self) -> Option<PathBuf> {
        self.claude_root.clone().or_else(paths::claude_dir)
    }

    pub fn codex_root(&self) -> Option<PathBuf> {
        self.codex_root.clone().or_else(paths::codex_dir)
    }

    pub fn copilot_root(&self) -> Option<PathBuf> {
        self.copilot_root.clone().or_else(paths::copilot_dir)
    }

    pub fn crush_projects_file(&self) -> Option<PathBuf> {
        self.crush_projects_file
            .clone()
            .or_else(paths::crush_projects_file)
    }

    pub fn opencode_root(&self) -> Option<PathBuf> {
        self.opencode_root.clone().or_else(paths::opencode_storage_dir)
    }

    pub fn vibe_root(&self) -> Option<PathBuf> {
        self.vibe_root.clone().or_else(paths::vibe_dir)
    }

    pub fn index_root(&self) -> Option<PathBuf> {
        self.index_root
            .clone()
            .or_else(|| paths::search_index_dir("session-scan"))
    }
}
