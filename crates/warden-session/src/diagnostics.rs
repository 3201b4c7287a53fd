//! Diagnostic entries: the per-session event trail.
//!
//! Entries are appended by the supervisor and the progress fan-out, kept in
//! a bounded ring on the session record, and read back through
//! `tail_session` / `get_session`. Sequence numbers are per-session and
//! strictly increasing; eviction never resets them.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// What produced a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    /// Lifecycle events from the server itself.
    System,
    /// Progress fan-out messages.
    Progress,
    /// Raw agent output lines.
    Output,
}

#[derive(Debug, Clone)]
pub struct DiagnosticEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Wire form of a diagnostic entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticEntryView {
    pub seq: u64,
    pub ts: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl DiagnosticEntry {
    pub fn view(&self) -> DiagnosticEntryView {
        DiagnosticEntryView {
            seq: self.seq,
            ts: self.at.to_rfc3339_opts(SecondsFormat::Secs, true),
            kind: self.kind,
            message: self.message.clone(),
        }
    }
}

/// Truncate `s` to at most `max_bytes`, never splitting a code point, and
/// drop a trailing newline left over from the cut.
pub(crate) fn truncate_message(s: &str, max_bytes: usize) -> String {
    if max_bytes == 0 || s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].trim_end_matches('\n').to_string()
}
