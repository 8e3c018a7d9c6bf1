//! The normalized data model every adapter emits into and the aggregator and
//! index consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Prefix prepended to every human turn when building `content`.
pub const HUMAN_PREFIX: &str = "» ";
/// Prefix prepended to every assistant turn when building `content`.
pub const ASSISTANT_PREFIX: &str = "  ";

/// The coding-assistant tool a session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Agent {
    Claude,
    Codex,
    CopilotCli,
    Crush,
    OpenCode,
    Vibe,
}

impl Agent {
    /// The canonical tag stored in the index's `agent` field and used as the
    /// adapter's own `name()`.
    pub fn tag(self) -> &'static str {
        match self {
            Agent::Claude => "claude",
            Agent::Codex => "codex",
            Agent::CopilotCli => "copilot-cli",
            Agent::Crush => "crush",
            Agent::OpenCode => "opencode",
            Agent::Vibe => "vibe",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "claude" => Some(Agent::Claude),
            "codex" => Some(Agent::Codex),
            "copilot-cli" => Some(Agent::CopilotCli),
            "crush" => Some(Agent::Crush),
            "opencode" => Some(Agent::OpenCode),
            "vibe" => Some(Agent::Vibe),
            _ => None,
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A single normalized, indexed coding-assistant session.
///
/// Never mutated in place: a changed on-disk file produces a brand new
/// `SessionRecord` that replaces the old one in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub agent: Agent,
    pub title: String,
    pub directory: String,
    pub timestamp: DateTime<Utc>,
    pub preview: String,
    pub content: String,
    pub message_count: u32,
    /// Modification signal used by the incremental-diff protocol. Must be
    /// stable across re-parses of unchanged bytes.
    pub mtime: f64,
    pub yolo: bool,
}

impl SessionRecord {
    /// `true` if this record should be suppressed rather than indexed: no
    /// human turn ever emitted, or no content at all.
    pub fn is_empty_session(&self) -> bool {
        self.message_count == 0 || self.content.trim().is_empty()
    }
}

/// Derived view `{id -> (mtime, agent)}`, synthesized from the current index
/// state and handed to each adapter's incremental scan.
pub type KnownMap = HashMap<String, (f64, Agent)>;

/// The result of one adapter's incremental scan.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub upserts: Vec<SessionRecord>,
    pub deleted_ids: Vec<String>,
}

/// Truncate `s` to at most `max_chars` characters, preserving UTF-8
/// boundaries and a trailing ellipsis when truncation actually occurred.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}
