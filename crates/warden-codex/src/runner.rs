//! The streaming supervisor loop.
//!
//! One reader task per pipe feeds a bounded line channel; the consumer is
//! the sole owner of the parse state and awaits on lines, the total
//! deadline, the no-output watchdog, caller cancellation, and a heartbeat
//! tick. Every exit path kills the process tree and reaps the child.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use warden_types::{SandboxMode, ToolError};

use crate::argv::build_argv;
use crate::output::RecentLines;
use crate::process::{isolate_process_group, kill_process_tree};
use crate::report::Reporter;

const DEFAULT_TOTAL_TIMEOUT: Duration = Duration::from_secs(3600);
const MAX_TOTAL_TIMEOUT: Duration = Duration::from_secs(3600);
const DEFAULT_MAX_BUFFERED_LINES: usize = 100;
const PROGRESS_TICK: Duration = Duration::from_secs(5);

/// Parameters for one codex invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub sandbox: SandboxMode,
    /// Non-empty resumes an existing codex thread.
    pub session_id: String,
    pub skip_git_repo_check: bool,
    pub return_all_messages: bool,
    pub image_paths: Vec<String>,
    pub model: String,
    pub yolo: bool,
    pub profile: String,
    /// Total timeout; zero means the default. Clamped to one hour.
    pub timeout: Duration,
    /// No-output watchdog; zero disables it.
    pub no_output_timeout: Duration,
    /// Explicit executable; `None` resolves `codex` on PATH.
    pub executable_path: Option<PathBuf>,
    pub max_buffered_lines: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            working_dir: PathBuf::new(),
            sandbox: SandboxMode::ReadOnly,
            session_id: String::new(),
            skip_git_repo_check: true,
            return_all_messages: false,
            image_paths: Vec::new(),
            model: String::new(),
            yolo: false,
            profile: String::new(),
            timeout: DEFAULT_TOTAL_TIMEOUT,
            no_output_timeout: Duration::ZERO,
            executable_path: None,
            max_buffered_lines: DEFAULT_MAX_BUFFERED_LINES,
        }
    }
}

/// Outcome of a codex invocation that ran to completion.
///
/// `success=false` carries the reason in `error`; aborted runs (timeouts,
/// cancellation, spawn failures) are returned as `Err` from [`run`] instead.
#[derive(Debug)]
pub struct RunResult {
    pub success: bool,
    pub session_id: String,
    pub agent_messages: String,
    pub all_messages: Option<Vec<Value>>,
    pub tool_call_count: u64,
    pub error: Option<ToolError>,
}

struct ParseState {
    success: bool,
    session_id: String,
    agent_messages: Vec<String>,
    all_messages: Vec<Value>,
    tool_call_count: u64,
    error: Option<ToolError>,
    ring: RecentLines,
    last_output_at: DateTime<Utc>,
    seen_output: bool,
    seen_agent_message: bool,
}

impl ParseState {
    /// Record a failure reason; the first one wins.
    fn fail(&mut self, err: ToolError) {
        self.success = false;
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Execute codex and stream its output until exit, timeout, or cancellation.
pub async fn run(
    cancel: &CancellationToken,
    opts: RunOptions,
    reporter: &dyn Reporter,
) -> Result<RunResult, ToolError> {
    let total_timeout = effective_timeout(opts.timeout);
    let capacity = if opts.max_buffered_lines == 0 {
        DEFAULT_MAX_BUFFERED_LINES
    } else {
        opts.max_buffered_lines
    };

    reporter.report("initializing");
    let exe = resolve_executable(&opts)?;

    let args = build_argv(&opts);
    debug!(exe = %exe.display(), arg_count = args.len(), "starting codex");
    reporter.report("starting codex");

    let mut cmd = Command::new(&exe);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    isolate_process_group(&mut cmd);

    let mut child = cmd
        .spawn()
        .map_err(|e| ToolError::execution_failed("failed to start codex command").with_cause(e))?;
    reporter.report("codex running");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ToolError::execution_failed("child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ToolError::execution_failed("child stderr not captured"))?;

    // Merged stdout+stderr: both readers feed the same bounded channel.
    let (line_tx, mut line_rx) = mpsc::channel::<String>(64);
    let (err_tx, mut err_rx) = mpsc::channel::<std::io::Error>(2);
    spawn_reader(stdout, line_tx.clone(), err_tx.clone());
    spawn_reader(stderr, line_tx, err_tx);

    let mut state = ParseState {
        success: true,
        session_id: String::new(),
        agent_messages: Vec::new(),
        all_messages: Vec::new(),
        tool_call_count: 0,
        error: None,
        ring: RecentLines::new(capacity),
        last_output_at: Utc::now(),
        seen_output: false,
        seen_agent_message: false,
    };

    let watchdog_enabled = !opts.no_output_timeout.is_zero();
    let total = tokio::time::sleep(total_timeout);
    tokio::pin!(total);
    let watchdog = tokio::time::sleep(if watchdog_enabled {
        opts.no_output_timeout
    } else {
        total_timeout
    });
    tokio::pin!(watchdog);
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + PROGRESS_TICK, PROGRESS_TICK);

    loop {
        tokio::select! {
            maybe_line = line_rx.recv() => {
                match maybe_line {
                    Some(line) => {
                        if watchdog_enabled {
                            watchdog
                                .as_mut()
                                .reset(tokio::time::Instant::now() + opts.no_output_timeout);
                        }
                        state.last_output_at = Utc::now();
                        consume_line(&mut state, line.trim(), &opts, reporter);
                    }
                    None => break,
                }
            }
            Some(read_err) = err_rx.recv() => {
                state.fail(ToolError::execution_failed(format!(
                    "failed to read codex output: {read_err}"
                )));
            }
            _ = &mut watchdog, if watchdog_enabled => {
                kill_process_tree(&mut child).await;
                let err = ToolError::no_output_timeout(opts.no_output_timeout.as_secs())
                    .with_data(
                        "last_output_at",
                        state.last_output_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                    );
                return Err(attach_recent_output(err, &state.ring));
            }
            _ = &mut total => {
                kill_process_tree(&mut child).await;
                let err = ToolError::codex_timeout(total_timeout.as_secs());
                return Err(attach_recent_output(err, &state.ring));
            }
            _ = cancel.cancelled() => {
                kill_process_tree(&mut child).await;
                let err = ToolError::execution_failed("codex execution canceled");
                return Err(attach_recent_output(err, &state.ring));
            }
            _ = ticker.tick() => {
                reporter.report("running");
            }
        }
    }

    reporter.report("finalizing");

    let status = child
        .wait()
        .await
        .map_err(|e| ToolError::execution_failed("failed to wait for codex").with_cause(e))?;
    if !status.success() {
        let err = ToolError::execution_failed(format!("codex command failed: {status}"));
        return Err(attach_recent_output(err, &state.ring));
    }

    // Post-checks: a run without a session id or without any agent message
    // is not a success even when the process exited cleanly.
    if state.session_id.trim().is_empty() {
        let prior = take_error_message(&mut state);
        state.success = false;
        state.error = Some(ToolError::execution_failed(join_messages(
            "Failed to get SESSION_ID from the codex session.",
            &prior,
        )));
    }
    if state.agent_messages.is_empty() {
        let prior = take_error_message(&mut state);
        state.success = false;
        state.error = Some(ToolError::execution_failed(join_messages(
            "Failed to get agent_messages from the codex session. \
             You can try to set return_all_messages to true to get the full reasoning information.",
            &prior,
        )));
    }

    let error = state
        .error
        .take()
        .map(|e| attach_recent_output(e, &state.ring));

    debug!(
        success = state.success,
        session_id = %state.session_id,
        tool_calls = state.tool_call_count,
        "codex finished"
    );

    Ok(RunResult {
        success: state.success,
        session_id: state.session_id,
        agent_messages: state.agent_messages.join("\n"),
        all_messages: opts.return_all_messages.then_some(state.all_messages),
        tool_call_count: state.tool_call_count,
        error,
    })
}

fn consume_line(state: &mut ParseState, line: &str, opts: &RunOptions, reporter: &dyn Reporter) {
    if line.is_empty() {
        return;
    }
    state.ring.push(line);
    reporter.output(line);
    if !state.seen_output {
        state.seen_output = true;
        reporter.report("received output");
    }

    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            // Keep draining; stopping here would back-pressure the child.
            state.fail(
                ToolError::execution_failed("codex produced a non-JSON output line")
                    .with_data("line", line),
            );
            return;
        }
    };

    if opts.return_all_messages {
        state.all_messages.push(value.clone());
    }

    if let Some(thread_id) = value.get("thread_id").and_then(Value::as_str) {
        if !thread_id.is_empty() {
            if state.session_id.is_empty() {
                reporter.report("received SESSION_ID");
            }
            // Latest wins, though agents emit a single thread id in practice.
            state.session_id = thread_id.to_string();
        }
    }

    if let Some(item) = value.get("item") {
        match item.get("type").and_then(Value::as_str) {
            Some("tool_call") | Some("tool_use") => {
                state.tool_call_count += 1;
            }
            Some("agent_message") => {
                if let Some(text) = item.get("text").and_then(Value::as_str) {
                    if !state.seen_agent_message {
                        state.seen_agent_message = true;
                        reporter.report("received agent message");
                    }
                    state.agent_messages.push(text.to_string());
                }
            }
            _ => {}
        }
    }

    if let Some(event_type) = value.get("type").and_then(Value::as_str) {
        // Deliberately conservative: any event type mentioning failure is
        // treated as one, at the cost of flagging the odd benign event.
        if event_type.contains("fail") || event_type.contains("error") {
            let message = value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .or_else(|| value.get("message").and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| format!("codex reported event type {event_type:?}"));
            state.fail(ToolError::execution_failed(message));
        }
    }
}

fn spawn_reader<R>(reader: R, tx: mpsc::Sender<String>, err_tx: mpsc::Sender<std::io::Error>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    let _ = err_tx.try_send(err);
                    return;
                }
            }
        }
    });
}

fn effective_timeout(requested: Duration) -> Duration {
    if requested.is_zero() {
        DEFAULT_TOTAL_TIMEOUT
    } else {
        requested.min(MAX_TOTAL_TIMEOUT)
    }
}

fn resolve_executable(opts: &RunOptions) -> Result<PathBuf, ToolError> {
    if let Some(path) = &opts.executable_path {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(ToolError::new(
            warden_types::ErrorCode::CodexNotFound,
            "configured codex executable does not exist",
        )
        .with_data("path", path.display().to_string()));
    }
    which::which("codex")
        .map_err(ToolError::codex_not_found)
}

fn attach_recent_output(err: ToolError, ring: &RecentLines) -> ToolError {
    if ring.is_empty() {
        return err;
    }
    err.with_data(
        "recent_output",
        Value::from(ring.snapshot()),
    )
}

fn take_error_message(state: &mut ParseState) -> String {
    state
        .error
        .take()
        .map(|e| e.message)
        .unwrap_or_default()
}

fn join_messages(head: &str, tail: &str) -> String {
    if tail.is_empty() {
        head.to_string()
    } else {
        format!("{head} {tail}")
    }
}
