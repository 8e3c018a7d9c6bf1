//! Default on-disk locations for each adapter's source root and for the
//! search index, resolved from the invoking user's home/cache directories.

use std::path::PathBuf;

pub fn claude_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|d| d.join(".claude").join("projects"))
}

pub fn codex_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|d| d.join(".codex").join("sessions"))
}

pub fn copilot_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|d| d.join(".copilot").join("session-state"))
}

pub fn crush_projects_file() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("crush").join("projects.json"))
}

pub fn opencode_storage_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("opencode").join("storage"))
}

pub fn vibe_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|d| d.join(".vibe").join("logs").join("session"))
}

/// `~/.cache/<app>/tantivy_index/`
pub fn search_index_dir(app: &str) -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join(app).join("tantivy_index"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_dir_ends_in_claude_projects() {
        let path = claude_dir().expect("home dir resolvable in test env");
        assert!(path.ends_with(".claude/projects"));
    }

    #[test]
    fn codex_dir_ends_in_codex_sessions() {
        let path = codex_dir().expect("home dir resolvable in test env");
        assert!(path.ends_with(".codex/sessions"));
    }

    #[test]
    fn search_index_dir_is_namespaced_by_app() {
        let path = search_index_dir("session-scan").expect("cache dir resolvable in test env");
        assert!(path.ends_with("session-scan/tantivy_index"));
    }
}
