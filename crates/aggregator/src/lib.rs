//! The orchestrator: fans adapters out in parallel, diffs their output
//! against the search index's idea of what's already there, and keeps an
//! in-memory `sessions_by_id` view so `search` never needs a second index
//! round-trip to materialise full records.
//!
//! State (`sessions_by_id`, `streaming_in_progress`, `loaded`) is guarded by
//! a reentrant mutex: the search path can call back into `get_all_sessions`,
//! which re-acquires the same lock from the same thread.

use parking_lot::ReentrantMutex;
use session_scan_core::adapters::{
    ClaudeAdapter, CodexAdapter, CopilotAdapter, CrushAdapter, OpenCodeAdapter, VibeAdapter,
};
use session_scan_core::config::ScanConfig;
use session_scan_core::types::{Agent, DiffResult, KnownMap, SessionRecord};
use session_scan_core::Adapter;
use session_scan_search::{SearchError, SearchIndex};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("no index root configured and no platform default cache directory available")]
    NoIndexRoot,
}

/// Counts reported after a `stream_sessions` pass completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub new: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: usize,
}

#[derive(Default)]
struct State {
    sessions_by_id: HashMap<String, SessionRecord>,
    streaming_in_progress: bool,
    loaded: bool,
}

pub struct SessionScan {
    adapters: Vec<Arc<dyn Adapter>>,
    index: Arc<SearchIndex>,
    state: ReentrantMutex<RefCell<State>>,
}

impl SessionScan {
    pub fn new(config: ScanConfig) -> Result<Self, AggregatorError> {
        let index_root = config.index_root().ok_or(AggregatorError::NoIndexRoot)?;
        let index = SearchIndex::open(&index_root)?;

        let adapters: Vec<Arc<dyn Adapter>> = vec![
            Arc::new(ClaudeAdapter::new(
                config.claude_root(),
                config.content_cap_chars,
                config.preview_cap_chars,
            )),
            Arc::new(CodexAdapter::new(
                config.codex_root(),
                config.content_cap_chars,
                config.preview_cap_chars,
            )),
            Arc::new(CopilotAdapter::new(
                config.copilot_root(),
                config.content_cap_chars,
                config.preview_cap_chars,
            )),
            Arc::new(CrushAdapter::new(
                config.crush_projects_file(),
                config.content_cap_chars,
                config.preview_cap_chars,
                config.relational_timeout,
            )),
            Arc::new(OpenCodeAdapter::new(
                config.opencode_root(),
                config.content_cap_chars,
                config.preview_cap_chars,
            )),
            Arc::new(VibeAdapter::new(
                config.vibe_root(),
                config.content_cap_chars,
                config.preview_cap_chars,
            )),
        ];

        Ok(Self {
            adapters,
            index: Arc::new(index),
            state: ReentrantMutex::new(RefCell::new(State::default())),
        })
    }

    /// The fast path used on process start. Returns `Ok(true)` if the index
    /// was already up to date and state was loaded from it, `Ok(false)` if
    /// the caller must fall back to `get_all_sessions`.
    pub async fn warm_load(&self) -> Result<bool, AggregatorError> {
        let known = self.index.known_sessions()?;
        if known.is_empty() {
            return Ok(false);
        }

        let diffs = self.diff_all(&known).await;
        let changed = diffs
            .iter()
            .any(|d| !d.upserts.is_empty() || !d.deleted_ids.is_empty());
        if changed {
            return Ok(false);
        }

        let sessions = self.index.all_sessions()?;
        self.install(sessions);
        Ok(true)
    }

    /// The full path: returns the cached snapshot if already loaded (unless
    /// `force_refresh`), otherwise fans adapters out, commits the diff to
    /// the index, and reloads.
    pub async fn get_all_sessions(&self, force_refresh: bool) -> Result<Vec<SessionRecord>, AggregatorError> {
        {
            let guard = self.state.lock();
            let st = guard.borrow();
            if (st.loaded && !force_refresh) || st.streaming_in_progress {
                return Ok(sorted_desc(st.sessions_by_id.values().cloned().collect()));
            }
        }

        let known = if force_refresh {
            KnownMap::new()
        } else {
            self.index.known_sessions()?
        };

        let diffs = self.diff_all(&known).await;
        let mut upserts = Vec::new();
        let mut deleted_ids = Vec::new();
        for diff in diffs {
            upserts.extend(diff.upserts);
            deleted_ids.extend(diff.deleted_ids);
        }

        if upserts.is_empty() && deleted_ids.is_empty() && !known.is_empty() {
            let sessions = self.index.all_sessions()?;
            self.install(sessions.clone());
            return Ok(sorted_desc(sessions));
        }

        self.commit_diff(&upserts, &deleted_ids)?;
        let sessions = self.index.all_sessions()?;
        self.install(sessions.clone());
        Ok(sorted_desc(sessions))
    }

    /// The progressive path: reports a provisional snapshot after each
    /// adapter completes, then commits the accumulated diff once all have
    /// finished.
    pub async fn stream_sessions<F>(&self, mut on_progress: F) -> Result<StreamSummary, AggregatorError>
    where
        F: FnMut(Vec<SessionRecord>) + Send,
    {
        {
            let guard = self.state.lock();
            guard.borrow_mut().streaming_in_progress = true;
        }

        let known = self.index.known_sessions()?;
        let mut join_set = tokio::task::JoinSet::new();
        for adapter in &self.adapters {
            let adapter = Arc::clone(adapter);
            let known = known.clone();
            join_set.spawn_blocking(move || {
                if !adapter.is_available() {
                    return DiffResult::default();
                }
                adapter.find_sessions_incremental(&known)
            });
        }

        let mut all_upserts: Vec<SessionRecord> = Vec::new();
        let mut all_deleted: Vec<String> = Vec::new();
        let mut errors = 0usize;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(diff) => {
                    all_upserts.extend(diff.upserts.clone());
                    all_deleted.extend(diff.deleted_ids.clone());
                    let snapshot = self.provisional_snapshot(&all_upserts, &all_deleted);
                    on_progress(snapshot);
                }
                Err(_) => errors += 1,
            }
        }

        let new = all_upserts.iter().filter(|s| !known.contains_key(&s.id)).count();
        let updated = all_upserts.len() - new;
        let deleted = all_deleted.len();

        self.commit_diff(&all_upserts, &all_deleted)?;
        let sessions = self.index.all_sessions()?;
        self.install(sessions);

        {
            let guard = self.state.lock();
            guard.borrow_mut().streaming_in_progress = false;
        }

        Ok(StreamSummary {
            new,
            updated,
            deleted,
            errors,
        })
    }

    /// Ensures sessions have been loaded at least once, then searches.
    /// Empty `query` filters the in-memory snapshot directly; a non-empty
    /// `query` defers ranking to the index and looks hits up by id.
    pub async fn search(
        &self,
        query: &str,
        agent_filter: Option<Agent>,
        directory_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, AggregatorError> {
        if !self.is_loaded() {
            self.get_all_sessions(false).await?;
        }

        if query.trim().is_empty() {
            let guard = self.state.lock();
            let st = guard.borrow();
            let mut matched: Vec<SessionRecord> = st
                .sessions_by_id
                .values()
                .filter(|s| agent_filter.map_or(true, |a| s.agent == a))
                .filter(|s| directory_matches(s, directory_filter))
                .cloned()
                .collect();
            matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            matched.truncate(limit);
            return Ok(matched);
        }

        let hits = self.index.search(query, agent_filter, limit)?;
        let guard = self.state.lock();
        let st = guard.borrow();
        let mut out = Vec::with_capacity(hits.len());
        for (id, _score) in hits {
            if let Some(session) = st.sessions_by_id.get(&id) {
                if directory_matches(session, directory_filter) {
                    out.push(session.clone());
                }
            }
        }
        out.truncate(limit);
        Ok(out)
    }

    /// Dispatches to `session`'s own adapter. `yolo` is OR'ed with the
    /// session's own flag.
    pub fn resume_command(&self, session: &SessionRecord, yolo: bool) -> Vec<String> {
        self.adapters
            .iter()
            .find(|a| a.name() == session.agent)
            .map(|a| a.resume_command(session, yolo || session.yolo))
            .unwrap_or_default()
    }

    fn is_loaded(&self) -> bool {
        let guard = self.state.lock();
        guard.borrow().loaded
    }

    async fn diff_all(&self, known: &KnownMap) -> Vec<DiffResult> {
        let mut join_set = tokio::task::JoinSet::new();
        for adapter in &self.adapters {
            let adapter = Arc::clone(adapter);
            let known = known.clone();
            join_set.spawn_blocking(move || {
                if !adapter.is_available() {
                    return DiffResult::default();
                }
                adapter.find_sessions_incremental(&known)
            });
        }

        let mut out = Vec::with_capacity(self.adapters.len());
        while let Some(joined) = join_set.join_next().await {
            if let Ok(diff) = joined {
                out.push(diff);
            }
        }
        out
    }

    /// Deletes in the diff are applied before any upsert add, and upsert ids
    /// are deleted first to prevent duplicates.
    fn commit_diff(&self, upserts: &[SessionRecord], deleted_ids: &[String]) -> Result<(), AggregatorError> {
        let upsert_ids: Vec<String> = upserts.iter().map(|s| s.id.clone()).collect();
        self.index.delete_ids(deleted_ids)?;
        self.index.delete_ids(&upsert_ids)?;
        self.index.add(upserts)?;
        Ok(())
    }

    /// Applies a partial diff to `sessions_by_id` in place and returns the
    /// resulting snapshot, so a concurrent `search`/`get_all_sessions` call
    /// sees the latest partial progress, not the pre-stream state.
    fn provisional_snapshot(&self, upserts: &[SessionRecord], deleted_ids: &[String]) -> Vec<SessionRecord> {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        for id in deleted_ids {
            st.sessions_by_id.remove(id);
        }
        for session in upserts {
            st.sessions_by_id.insert(session.id.clone(), session.clone());
        }
        sorted_desc(st.sessions_by_id.values().cloned().collect())
    }

    fn install(&self, sessions: Vec<SessionRecord>) {
        let guard = self.state.lock();
        let mut st = guard.borrow_mut();
        st.sessions_by_id = sessions.into_iter().map(|s| (s.id.clone(), s)).collect();
        st.loaded = true;
    }
}

fn directory_matches(session: &SessionRecord, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(f) => session.directory.to_lowercase().contains(&f.to_lowercase()),
    }
}

fn sorted_desc(mut sessions: Vec<SessionRecord>) -> Vec<SessionRecord> {
    sessions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sessions
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn sample(id: &str, agent: Agent) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            agent,
            title: "t".into(),
            directory: "/tmp/project".into(),
            timestamp: Utc::now(),
            preview: "p".into(),
            content: "c".into(),
            message_count: 1,
            mtime: 1_700_000_000.0,
            yolo: false,
        }
    }

    /// Builds a scan whose index lives in a temp directory and whose adapter
    /// roots all point at nonexistent paths, so `is_available()` is false
    /// everywhere. The returned `TempDir` must outlive the `SessionScan`.
    fn empty_scan() -> (SessionScan, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig {
            index_root: Some(dir.path().to_path_buf()),
            claude_root: Some(dir.path().join("nonexistent-claude")),
            codex_root: Some(dir.path().join("nonexistent-codex")),
            copilot_root: Some(dir.path().join("nonexistent-copilot")),
            crush_projects_file: Some(dir.path().join("nonexistent-crush/projects.json")),
            opencode_root: Some(dir.path().join("nonexistent-opencode")),
            vibe_root: Some(dir.path().join("nonexistent-vibe")),
            ..ScanConfig::default()
        };
        (SessionScan::new(config).unwrap(), dir)
    }

    #[tokio::test]
    async fn get_all_sessions_on_empty_roots_returns_empty() {
        let (scan, _dir) = empty_scan();
        let sessions = scan.get_all_sessions(false).await.unwrap();
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn warm_load_with_no_known_sessions_returns_false() {
        let (scan, _dir) = empty_scan();
        assert!(!scan.warm_load().await.unwrap());
    }

    #[tokio::test]
    async fn search_with_empty_query_before_any_load_does_not_panic() {
        let (scan, _dir) = empty_scan();
        let results = scan.search("", None, None, 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn concurrent_reads_from_sessions_by_id_see_consistent_count() {
        let (scan, _dir) = empty_scan();
        let scan = Arc::new(scan);
        scan.install(vec![sample("s1", Agent::Claude), sample("s2", Agent::Claude)]);

        let errors = Arc::new(StdMutex::new(Vec::<String>::new()));
        let seen_counts = Arc::new(StdMutex::new(Vec::<usize>::new()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let scan = Arc::clone(&scan);
            let errors = Arc::clone(&errors);
            let seen_counts = Arc::clone(&seen_counts);
            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let count = scan.state.lock().borrow().sessions_by_id.len();
                    if count != 2 {
                        errors.lock().unwrap().push(format!("saw {count}"));
                    }
                    seen_counts.lock().unwrap().push(count);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(errors.lock().unwrap().is_empty());
        assert_eq!(seen_counts.lock().unwrap().len(), 100);
    }

    #[tokio::test]
    async fn concurrent_read_write_sessions_by_id_stays_consistent() {
        let (scan, _dir) = empty_scan();
        let scan = Arc::new(scan);
        let write_count = Arc::new(AtomicUsize::new(0));

        let writer = {
            let scan = Arc::clone(&scan);
            let write_count = Arc::clone(&write_count);
            tokio::spawn(async move {
                let mut accumulated = Vec::new();
                for i in 0..50 {
                    accumulated.push(sample(&format!("s{i}"), Agent::Claude));
                    scan.install(accumulated.clone());
                    write_count.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let reader = {
            let scan = Arc::clone(&scan);
            tokio::spawn(async move {
                let mut last = 0usize;
                for _ in 0..50 {
                    let count = scan.state.lock().borrow().sessions_by_id.len();
                    assert!(count <= 50, "never more than the final install wrote: {count}");
                    last = count;
                }
                last
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
        assert_eq!(write_count.load(Ordering::SeqCst), 50);
        assert_eq!(scan.state.lock().borrow().sessions_by_id.len(), 50);
    }

    #[tokio::test]
    async fn resume_command_dispatches_to_matching_adapter() {
        let (scan, _dir) = empty_scan();
        let session = sample("s1", Agent::Claude);
        let cmd = scan.resume_command(&session, false);
        assert_eq!(cmd, vec!["claude".to_string(), "--resume".to_string(), "s1".to_string()]);
    }

    #[tokio::test]
    async fn reentrant_lock_allows_nested_acquisition_from_same_thread() {
        let (scan, _dir) = empty_scan();
        let outer = scan.state.lock();
        // A nested lock from the same thread must not deadlock.
        let inner = scan.state.lock();
        assert_eq!(outer.borrow().sessions_by_id.len(), inner.borrow().sessions_by_id.len());
    }

    /// Like `empty_scan`, but the claude root holds one real session file so
    /// `stream_sessions` has actual adapter work to diff and commit.
    fn one_claude_session_scan() -> (SessionScan, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let claude_root = dir.path().join("claude");
        std::fs::create_dir_all(&claude_root).unwrap();
        std::fs::write(
            claude_root.join("sess1.jsonl"),
            concat!(
                r#"{"type":"user","message":{"content":"fix the retry loop"},"cwd":"/home/u/p"}"#,
                "\n",
                r#"{"type":"assistant","message":{"content":"done"}}"#,
                "\n",
            ),
        )
        .unwrap();

        let config = ScanConfig {
            index_root: Some(dir.path().join("index")),
            claude_root: Some(claude_root),
            codex_root: Some(dir.path().join("nonexistent-codex")),
            copilot_root: Some(dir.path().join("nonexistent-copilot")),
            crush_projects_file: Some(dir.path().join("nonexistent-crush/projects.json")),
            opencode_root: Some(dir.path().join("nonexistent-opencode")),
            vibe_root: Some(dir.path().join("nonexistent-vibe")),
            ..ScanConfig::default()
        };
        (SessionScan::new(config).unwrap(), dir)
    }

    #[tokio::test]
    async fn stream_sessions_on_empty_roots_reports_zero_summary() {
        let (scan, _dir) = empty_scan();
        let mut snapshots = Vec::new();
        let summary = scan.stream_sessions(|snap| snapshots.push(snap)).await.unwrap();
        assert_eq!(summary, StreamSummary::default());
    }

    #[tokio::test]
    async fn stream_sessions_commits_new_session_and_reports_summary() {
        let (scan, _dir) = one_claude_session_scan();
        let summary = scan.stream_sessions(|_| {}).await.unwrap();
        assert_eq!(summary.new, 1);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.deleted, 0);
        assert_eq!(summary.errors, 0);

        let sessions = scan.get_all_sessions(false).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].directory, "/home/u/p");
    }

    #[tokio::test]
    async fn stream_sessions_rerun_reports_no_new_or_updated() {
        let (scan, _dir) = one_claude_session_scan();
        scan.stream_sessions(|_| {}).await.unwrap();
        let summary = scan.stream_sessions(|_| {}).await.unwrap();
        assert_eq!(summary.new, 0);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.deleted, 0);
    }

    #[tokio::test]
    async fn on_progress_callback_observes_partial_state_already_installed() {
        let (scan, _dir) = one_claude_session_scan();
        let mut seen_mid_stream = false;
        scan.stream_sessions(|_| {
            // The provisional write happens before on_progress is called, so
            // the shared state already reflects this snapshot's contents.
            let count = scan.state.lock().borrow().sessions_by_id.len();
            if count == 1 {
                seen_mid_stream = true;
            }
        })
        .await
        .unwrap();
        assert!(seen_mid_stream);
    }
}
