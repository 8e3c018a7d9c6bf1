//! Shared helpers for title derivation and content assembly, used by every
//! adapter so the uniform rules in the per-adapter table stay uniform.

use crate::types::{truncate_chars, ASSISTANT_PREFIX, HUMAN_PREFIX};

/// The single title-truncation rule applied by every adapter: trim to 100
/// chars at a word boundary, ellipsis on truncation. Supersedes the
/// inconsistent 80-char hard cuts some of the original per-tool
/// implementations used.
pub const TITLE_MAX_CHARS: usize = 100;

/// Derive a title from a candidate string (a summary field, or a first human
/// message), applying the uniform word-boundary truncation rule.
pub fn derive_title(candidate: &str) -> String {
    let trimmed = candidate.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    match truncated.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => format!("{}…", truncated[..idx].trim_end()),
        _ => truncate_chars(trimmed, TITLE_MAX_CHARS),
    }
}

/// Append one human turn to a growing content buffer.
pub fn push_human_line(buf: &mut String, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    if !buf.is_empty() {
        buf.push_str("\n\n");
    }
    buf.push_str(HUMAN_PREFIX);
    buf.push_str(text.trim());
}

/// Append one assistant turn to a growing content buffer.
pub fn push_assistant_line(buf: &mut String, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    if !buf.is_empty() {
        buf.push_str("\n\n");
    }
    buf.push_str(ASSISTANT_PREFIX);
    buf.push_str(text.trim());
}

/// Build `preview` as a strict prefix of `content` — a bare char slice, no
/// ellipsis, per the `preview == content[:preview_limit]` invariant.
pub fn derive_preview(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

/// Cap `content` before it is handed to the index.
pub fn cap_content(content: String, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content
    } else {
        truncate_chars(&content, max_chars)
    }
}
