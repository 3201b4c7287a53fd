//! Session registry: state machine, concurrency gate, TTL reaper.
//!
//! One record per supervised agent invocation, keyed by the tracking id
//! (caller-supplied or `tmp_<hex>` until the agent reports its thread id).
//! All operations take the single registry mutex briefly and never perform
//! I/O while holding it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use warden_receipt::ChangeReceipt;
use warden_types::{SandboxMode, ToolError};

use crate::diagnostics::{truncate_message, DiagnosticEntry, DiagnosticEntryView, DiagnosticKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Running)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub max_running: usize,
    /// Terminal records older than this are reaped. `None` disables reaping.
    pub ttl: Option<Duration>,
    pub diagnostics_max_entries: usize,
    pub diagnostics_max_entry_bytes: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            max_running: 4,
            ttl: Some(Duration::from_secs(3600)),
            diagnostics_max_entries: 200,
            diagnostics_max_entry_bytes: 2048,
        }
    }
}

struct Record {
    id: String,
    state: SessionState,
    workdir: String,
    sandbox: SandboxMode,

    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,

    execution_time_ms: i64,
    tool_call_count: u64,

    error: String,

    cancel: Option<CancellationToken>,

    change_receipt: Option<ChangeReceipt>,

    diag_next_seq: u64,
    diagnostics: VecDeque<DiagnosticEntry>,
    last_event_at: Option<DateTime<Utc>>,
    last_output_at: Option<DateTime<Utc>>,
}

/// Wire form of a session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    #[serde(rename = "SESSION_ID")]
    pub session_id: String,
    pub state: SessionState,
    #[serde(rename = "cd")]
    pub workdir: String,
    pub sandbox: SandboxMode,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ended_at: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub execution_time_ms: i64,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub tool_call_count: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Session view plus the diagnostics tail and captured receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetailView {
    #[serde(flatten)]
    pub view: SessionView,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_event_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_output_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_entries: Vec<DiagnosticEntryView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_receipt: Option<ChangeReceipt>,
}

/// Result of a cursor-based diagnostics read.
#[derive(Debug, Clone)]
pub struct DiagnosticsTail {
    pub entries: Vec<DiagnosticEntryView>,
    pub next_cursor: u64,
    pub dropped: bool,
    pub dropped_before: u64,
    pub state: SessionState,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Record {
    fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            state: self.state,
            workdir: self.workdir.clone(),
            sandbox: self.sandbox,
            started_at: fmt_ts(self.started_at),
            ended_at: self.ended_at.map(fmt_ts).unwrap_or_default(),
            execution_time_ms: self.execution_time_ms,
            tool_call_count: self.tool_call_count,
            error: self.error.clone(),
        }
    }

    fn detail_view(&self, recent_limit: usize) -> SessionDetailView {
        let limit = if recent_limit == 0 { 20 } else { recent_limit.min(200) };
        let start = self.diagnostics.len().saturating_sub(limit);
        SessionDetailView {
            view: self.view(),
            last_event_at: self.last_event_at.map(fmt_ts).unwrap_or_default(),
            last_output_at: self.last_output_at.map(fmt_ts).unwrap_or_default(),
            recent_entries: self
                .diagnostics
                .iter()
                .skip(start)
                .map(DiagnosticEntry::view)
                .collect(),
            change_receipt: self.change_receipt.clone(),
        }
    }
}

/// Process-wide session registry.
pub struct SessionRegistry {
    opts: RegistryOptions,
    sessions: Mutex<HashMap<String, Record>>,
}

/// Mint a fresh temporary tracking id of the form `tmp_<hex>`.
pub fn new_temporary_id() -> String {
    format!("tmp_{}", uuid::Uuid::new_v4().simple())
}

impl SessionRegistry {
    pub fn new(opts: RegistryOptions) -> Self {
        Self {
            opts,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open a slot for a new running session.
    ///
    /// Sweeps expired terminal records, rejects a duplicate running id, and
    /// enforces the concurrency cap.
    pub fn start(
        &self,
        session_id: &str,
        workdir: &str,
        sandbox: SandboxMode,
        cancel: CancellationToken,
    ) -> Result<SessionView, ToolError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(ToolError::invalid_params("SESSION_ID is required"));
        }

        let now = Utc::now();
        let mut sessions = self.lock();
        Self::cleanup_expired_locked(&mut sessions, self.opts.ttl, now);

        if let Some(existing) = sessions.get(session_id) {
            if existing.state == SessionState::Running {
                return Err(ToolError::invalid_params("session is already running"));
            }
        }

        let running = sessions
            .values()
            .filter(|r| r.state == SessionState::Running)
            .count();
        if self.opts.max_running > 0 && running >= self.opts.max_running {
            return Err(ToolError::session_limit_exceeded(
                self.opts.max_running,
                running,
            ));
        }

        let record = Record {
            id: session_id.to_string(),
            state: SessionState::Running,
            workdir: workdir.to_string(),
            sandbox,
            started_at: now,
            ended_at: None,
            execution_time_ms: 0,
            tool_call_count: 0,
            error: String::new(),
            cancel: Some(cancel),
            change_receipt: None,
            diag_next_seq: 0,
            diagnostics: VecDeque::with_capacity(self.opts.diagnostics_max_entries),
            last_event_at: None,
            last_output_at: None,
        };
        let view = record.view();
        sessions.insert(session_id.to_string(), record);
        Ok(view)
    }

    /// Best-effort rename of a temporary tracking id to the agent-reported
    /// thread id. No-op when either id is empty, they are equal, or `old`
    /// is unknown. Fails only when `new` is already taken.
    pub fn update_id(&self, old: &str, new: &str) -> Result<bool, ToolError> {
        let old = old.trim();
        let new = new.trim();
        if old.is_empty() || new.is_empty() || old == new {
            return Ok(false);
        }

        let mut sessions = self.lock();
        if !sessions.contains_key(old) {
            return Ok(false);
        }
        if sessions.contains_key(new) {
            return Err(ToolError::invalid_params("new SESSION_ID already exists"));
        }
        let Some(mut record) = sessions.remove(old) else {
            return Ok(false);
        };
        record.id = new.to_string();
        sessions.insert(new.to_string(), record);
        debug!(old, new, "session tracking id renamed");
        Ok(true)
    }

    pub fn mark_completed(&self, session_id: &str, execution_time_ms: i64, tool_calls: u64) -> bool {
        self.finish(
            session_id,
            SessionState::Completed,
            String::new(),
            execution_time_ms,
            tool_calls,
        )
    }

    pub fn mark_failed(&self, session_id: &str, err: &ToolError) -> bool {
        self.finish(session_id, SessionState::Failed, err.to_string(), 0, 0)
    }

    pub fn mark_cancelled(&self, session_id: &str, reason: &str) -> bool {
        self.finish(
            session_id,
            SessionState::Cancelled,
            reason.to_string(),
            0,
            0,
        )
    }

    /// Attach a captured change receipt to the record.
    pub fn set_change_receipt(&self, session_id: &str, receipt: ChangeReceipt) -> bool {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return false;
        }
        let mut sessions = self.lock();
        match sessions.get_mut(session_id) {
            Some(record) => {
                record.change_receipt = Some(receipt);
                true
            }
            None => false,
        }
    }

    /// Append a diagnostic entry, assigning the next sequence number and
    /// truncating the message to the configured byte budget.
    pub fn append_diagnostic(
        &self,
        session_id: &str,
        kind: DiagnosticKind,
        message: &str,
    ) -> bool {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return false;
        }
        let now = Utc::now();

        // Never propagate a poisoned lock to the reporter path; diagnostics
        // are strictly best-effort.
        let Ok(mut sessions) = self.sessions.lock() else {
            return false;
        };
        let Some(record) = sessions.get_mut(session_id) else {
            return false;
        };

        record.diag_next_seq += 1;
        let entry = DiagnosticEntry {
            seq: record.diag_next_seq,
            at: now,
            kind,
            message: truncate_message(message, self.opts.diagnostics_max_entry_bytes),
        };
        record.diagnostics.push_back(entry);
        while self.opts.diagnostics_max_entries > 0
            && record.diagnostics.len() > self.opts.diagnostics_max_entries
        {
            record.diagnostics.pop_front();
        }
        record.last_event_at = Some(now);
        if kind == DiagnosticKind::Output {
            record.last_output_at = Some(now);
        }
        true
    }

    /// Read entries with `seq > cursor`, capped at `limit` (default 50,
    /// max 200). A cursor below the oldest retained entry flags `dropped`
    /// and resumes from what is still buffered.
    pub fn tail_diagnostics(
        &self,
        session_id: &str,
        cursor: u64,
        limit: usize,
    ) -> Option<DiagnosticsTail> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return None;
        }
        let limit = if limit == 0 { 50 } else { limit.min(200) };

        let sessions = self.lock();
        let record = sessions.get(session_id)?;

        let mut cursor = cursor;
        let mut dropped = false;
        let mut dropped_before = 0;
        if let Some(oldest) = record.diagnostics.front().map(|e| e.seq) {
            if cursor != 0 && cursor < oldest {
                dropped = true;
                dropped_before = oldest;
                // Resume from the oldest entry we still have.
                cursor = oldest - 1;
            }
        }

        let entries: Vec<DiagnosticEntryView> = record
            .diagnostics
            .iter()
            .filter(|e| e.seq > cursor)
            .take(limit)
            .map(DiagnosticEntry::view)
            .collect();

        let next_cursor = entries.last().map(|e| e.seq).unwrap_or(cursor);
        Some(DiagnosticsTail {
            entries,
            next_cursor,
            dropped,
            dropped_before,
            state: record.state,
        })
    }

    pub fn get(&self, session_id: &str) -> Option<SessionView> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return None;
        }
        self.lock().get(session_id).map(Record::view)
    }

    pub fn get_detail(&self, session_id: &str, recent_limit: usize) -> Option<SessionDetailView> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return None;
        }
        self.lock()
            .get(session_id)
            .map(|r| r.detail_view(recent_limit))
    }

    /// Snapshot of all sessions, newest first.
    pub fn list(&self) -> Vec<SessionView> {
        let sessions = self.lock();
        let mut records: Vec<&Record> = sessions.values().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.iter().map(|r| r.view()).collect()
    }

    /// Cancel a running session: fire its cancellation handle and transition
    /// to cancelled. Returns `Ok(false)` for a known but non-running id.
    pub fn cancel(&self, session_id: &str) -> Result<bool, ToolError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(ToolError::invalid_params("SESSION_ID is required"));
        }

        let now = Utc::now();
        let mut sessions = self.lock();
        let Some(record) = sessions.get_mut(session_id) else {
            return Err(ToolError::session_not_found(session_id));
        };
        if record.state != SessionState::Running {
            return Ok(false);
        }

        record.state = SessionState::Cancelled;
        record.error = "cancel requested".to_string();
        record.execution_time_ms = 0;
        record.tool_call_count = 0;
        record.ended_at = Some(now);
        if let Some(cancel) = record.cancel.take() {
            cancel.cancel();
        }
        Ok(true)
    }

    /// Remove terminal records whose `ended_at` is older than the TTL.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.lock();
        Self::cleanup_expired_locked(&mut sessions, self.opts.ttl, now)
    }

    /// Spawn the background TTL sweeper, stopped by `shutdown`.
    pub fn start_cleanup(self: &Arc<Self>, shutdown: CancellationToken, interval: Duration) {
        let interval = if interval.is_zero() {
            Duration::from_secs(60)
        } else {
            interval
        };
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = registry.cleanup_expired(Utc::now());
                        if removed > 0 {
                            debug!(removed, "reaped expired sessions");
                        }
                    }
                    _ = shutdown.cancelled() => return,
                }
            }
        });
    }

    fn finish(
        &self,
        session_id: &str,
        state: SessionState,
        error: String,
        execution_time_ms: i64,
        tool_calls: u64,
    ) -> bool {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return false;
        }

        let now = Utc::now();
        let mut sessions = self.lock();
        let Some(record) = sessions.get_mut(session_id) else {
            return false;
        };

        // An explicit cancellation is sticky; a late completion or failure
        // from the supervisor must not overwrite it.
        if record.state == SessionState::Cancelled {
            return true;
        }

        record.state = state;
        record.error = error;
        record.execution_time_ms = execution_time_ms;
        record.tool_call_count = tool_calls;
        record.ended_at = Some(now);
        record.cancel = None;

        Self::cleanup_expired_locked(&mut sessions, self.opts.ttl, now);
        true
    }

    fn cleanup_expired_locked(
        sessions: &mut HashMap<String, Record>,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(ttl) = ttl else { return 0 };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, r| match (r.state, r.ended_at) {
            (SessionState::Running, _) | (_, None) => true,
            (_, Some(ended)) => now - ended <= ttl,
        });
        before - sessions.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Record>> {
        // Registry mutations never panic while holding the lock, so a
        // poisoned mutex means a bug elsewhere; recover the data anyway.
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
