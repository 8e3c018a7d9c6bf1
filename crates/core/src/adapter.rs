//! The common contract every per-tool adapter implements.

use crate::types::{Agent, DiffResult, KnownMap, SessionRecord};

/// A per-tool component that reads a tool's native session storage and
/// produces `SessionRecord`s.
///
/// `find_sessions` is expected to be a thin shim over
/// `find_sessions_incremental` with an empty `KnownMap` — the incremental
/// path is the only place scan/parse logic should live.
pub trait Adapter: Send + Sync {
    fn name(&self) -> Agent;

    /// Whether this adapter's source root exists on disk.
    fn is_available(&self) -> bool;

    /// Full scan: every current session.
    fn find_sessions(&self) -> Vec<SessionRecord> {
        self.find_sessions_incremental(&KnownMap::new()).upserts
    }

    /// Diff scan against a previously known `(id, mtime, agent)` view.
    fn find_sessions_incremental(&self, known: &KnownMap) -> DiffResult;

    /// The argv that resumes `session`. Empty if unsupported. `yolo` is the
    /// caller's own request, already OR'ed with `session.yolo`.
    fn resume_command(&self, session: &SessionRecord, yolo: bool) -> Vec<String>;
}
