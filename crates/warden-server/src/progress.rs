//! Progress fan-out: protocol notifications plus session diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use warden_codex::Reporter;
use warden_session::{DiagnosticKind, SessionRegistry};

use crate::rpc::progress_notification;

/// Emits `notifications/progress` for a caller-supplied progress token.
/// Each report bumps a monotonic counter; sends are fire-and-forget.
pub struct ProgressNotifier {
    outbound: UnboundedSender<Value>,
    token: Value,
    seq: AtomicU64,
}

impl ProgressNotifier {
    pub fn new(outbound: UnboundedSender<Value>, token: Value) -> Self {
        Self {
            outbound,
            token,
            seq: AtomicU64::new(0),
        }
    }

    fn notify(&self, message: &str) {
        let progress = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self
            .outbound
            .send(progress_notification(&self.token, progress, message));
    }
}

/// The composite reporter handed to the supervisor: mirrors progress into
/// the session diagnostics ring and forwards to the protocol notifier when
/// the caller asked for notifications. Raw output lines only go to
/// diagnostics. Both paths are best-effort and never fail the supervisor.
pub struct SessionReporter {
    sessions: Arc<SessionRegistry>,
    session_id: String,
    notifier: Option<ProgressNotifier>,
}

impl SessionReporter {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        session_id: String,
        notifier: Option<ProgressNotifier>,
    ) -> Self {
        Self {
            sessions,
            session_id,
            notifier,
        }
    }
}

impl Reporter for SessionReporter {
    fn report(&self, message: &str) {
        self.sessions
            .append_diagnostic(&self.session_id, DiagnosticKind::Progress, message);
        if let Some(notifier) = &self.notifier {
            notifier.notify(message);
        }
    }

    fn output(&self, line: &str) {
        self.sessions
            .append_diagnostic(&self.session_id, DiagnosticKind::Output, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use warden_session::{RegistryOptions, SessionState};
    use warden_types::SandboxMode;

    fn registry_with_session(id: &str) -> Arc<SessionRegistry> {
        let reg = Arc::new(SessionRegistry::new(RegistryOptions::default()));
        reg.start(id, "/tmp", SandboxMode::ReadOnly, CancellationToken::new())
            .unwrap();
        reg
    }

    #[tokio::test]
    async fn notifier_counts_monotonically() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let notifier = ProgressNotifier::new(tx, Value::from("tok-1"));
        notifier.notify("one");
        notifier.notify("two");

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first["params"]["progress"], 1);
        assert_eq!(second["params"]["progress"], 2);
        assert_eq!(second["params"]["message"], "two");
        assert_eq!(second["params"]["progressToken"], "tok-1");
    }

    #[tokio::test]
    async fn composite_fans_out_to_diagnostics_and_notifier() {
        let reg = registry_with_session("s1");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reporter = SessionReporter::new(
            reg.clone(),
            "s1".into(),
            Some(ProgressNotifier::new(tx, Value::from(42))),
        );

        reporter.report("starting codex");
        reporter.output("{\"thread_id\":\"t\"}");

        let tail = reg.tail_diagnostics("s1", 0, 0).unwrap();
        assert_eq!(tail.entries.len(), 2);
        assert_eq!(tail.entries[0].message, "starting codex");
        assert_eq!(tail.state, SessionState::Running);

        // Only the progress report is notified, not raw output.
        let n = rx.recv().await.unwrap();
        assert_eq!(n["params"]["message"], "starting codex");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reporting_for_unknown_session_is_silent() {
        let reg = Arc::new(SessionRegistry::new(RegistryOptions::default()));
        let reporter = SessionReporter::new(reg, "ghost".into(), None);
        reporter.report("nobody home");
        reporter.output("still nobody");
    }
}
