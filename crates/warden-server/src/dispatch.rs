//! Tool dispatch: validation, composition, and classification.
//!
//! `codex` is the interesting path: validate the input against the security
//! config, take the workspace lock, open a session slot, run the
//! supervisor with the progress fan-out attached, classify the outcome,
//! and optionally capture a change receipt. The other five tools are thin
//! readers over the session registry and metrics.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use warden_codex::{RunOptions, RunResult};
use warden_receipt::{ChangeReceipt, CollectOptions};
use warden_session::{new_temporary_id, DiagnosticKind, SessionDetailView, SessionView};
use warden_types::{ErrorCode, SandboxMode, ToolError};

use crate::logging::new_request_id;
use crate::metrics::MetricsSnapshot;
use crate::progress::{ProgressNotifier, SessionReporter};
use crate::rpc::JsonRpcResponse;
use crate::server::ServerState;
use crate::workdir::workdir_key;

#[derive(Debug, Deserialize)]
struct CodexInput {
    #[serde(rename = "PROMPT", default)]
    prompt: String,
    #[serde(default)]
    cd: String,
    #[serde(default)]
    sandbox: Option<String>,
    #[serde(rename = "SESSION_ID", default)]
    session_id: String,
    #[serde(default)]
    skip_git_repo_check: Option<bool>,
    #[serde(default)]
    return_all_messages: bool,
    #[serde(default)]
    image: Vec<String>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    yolo: Option<bool>,
    #[serde(default)]
    profile: String,
    #[serde(default)]
    timeout_seconds: Option<f64>,
    #[serde(default)]
    no_output_seconds: Option<f64>,
    #[serde(default)]
    return_diff: bool,
}

#[derive(Debug, Serialize)]
struct CodexOutput {
    success: bool,
    #[serde(rename = "SESSION_ID")]
    session_id: String,
    agent_messages: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    all_messages: Option<Vec<Value>>,
    execution_time_ms: i64,
    tool_call_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    change_receipt: Option<ChangeReceipt>,
}

#[derive(Debug, Deserialize)]
struct SessionIdInput {
    #[serde(rename = "SESSION_ID", default)]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct TailSessionInput {
    #[serde(rename = "SESSION_ID", default)]
    session_id: String,
    #[serde(default)]
    cursor: Option<f64>,
    #[serde(default)]
    limit: Option<f64>,
}

#[derive(Debug, Serialize)]
struct StatsOutput {
    uptime: String,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct ListSessionsOutput {
    sessions: Vec<SessionView>,
}

#[derive(Debug, Serialize)]
struct GetSessionOutput {
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<SessionDetailView>,
}

#[derive(Debug, Serialize)]
struct CancelSessionOutput {
    cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<SessionView>,
}

#[derive(Debug, Serialize)]
struct TailSessionOutput {
    found: bool,
    #[serde(rename = "SESSION_ID")]
    session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<warden_session::SessionState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    entries: Vec<warden_session::DiagnosticEntryView>,
    next_cursor: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    dropped: bool,
    #[serde(skip_serializing_if = "is_zero_u64")]
    dropped_before: u64,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

/// Handle one `tools/call` request end to end.
pub async fn handle_tools_call(
    state: &ServerState,
    id: Value,
    params: Option<Value>,
) -> JsonRpcResponse {
    let params = params.unwrap_or_else(|| Value::Object(Default::default()));
    let Some(tool) = params.get("name").and_then(Value::as_str).map(str::to_string) else {
        return JsonRpcResponse::error(
            id,
            &ToolError::invalid_params("missing 'name' in tools/call params"),
        );
    };
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    let progress_token = params.pointer("/_meta/progressToken").cloned();

    let request_id = new_request_id();
    let started = Instant::now();
    info!(request_id, tool, "tool request received");

    let outcome: Result<Value, ToolError> = match tool.as_str() {
        "codex" => handle_codex(state, arguments, progress_token).await,
        "stats" => handle_stats(state),
        "list_sessions" => handle_list_sessions(state),
        "get_session" => handle_get_session(state, arguments),
        "cancel_session" => handle_cancel_session(state, arguments),
        "tail_session" => handle_tail_session(state, arguments),
        other => Err(ToolError::new(
            ErrorCode::MethodNotFound,
            format!("unknown tool: {other}"),
        )),
    };

    let duration_ms = started.elapsed().as_millis() as i64;
    state
        .metrics
        .record_request(&tool, outcome.is_ok(), started.elapsed());
    match &outcome {
        Ok(_) => info!(request_id, tool, duration_ms, "tool request completed"),
        Err(err) => {
            state.metrics.record_error(err.code.name());
            error!(
                request_id,
                tool,
                duration_ms,
                code = err.code.code(),
                error = %err.message,
                "tool request failed"
            );
        }
    }

    match outcome {
        Ok(structured) => {
            let text = content_text(&tool, &structured);
            JsonRpcResponse::result(
                id,
                serde_json::json!({
                    "content": [{"type": "text", "text": text}],
                    "structuredContent": structured,
                }),
            )
        }
        Err(err) => JsonRpcResponse::error(id, &err),
    }
}

/// The codex tool result carries the agent's reply as text; everything
/// else echoes its structured output.
fn content_text(tool: &str, structured: &Value) -> String {
    if tool == "codex" {
        if let Some(text) = structured.get("agent_messages").and_then(Value::as_str) {
            return text.to_string();
        }
    }
    structured.to_string()
}

async fn handle_codex(
    state: &ServerState,
    arguments: Value,
    progress_token: Option<Value>,
) -> Result<Value, ToolError> {
    let input: CodexInput = serde_json::from_value(arguments)
        .map_err(|e| ToolError::invalid_params(format!("invalid codex input: {e}")))?;
    let cfg = &state.config;

    if input.prompt.is_empty() {
        return Err(ToolError::invalid_params(
            "PROMPT is required and must be a non-empty string",
        ));
    }
    if input.cd.is_empty() {
        return Err(ToolError::invalid_params(
            "cd is required and must be a non-empty string",
        ));
    }

    let workdir = Path::new(&input.cd);
    match std::fs::metadata(workdir) {
        Ok(meta) if !meta.is_dir() => {
            return Err(ToolError::workdir_not_directory(&input.cd));
        }
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ToolError::workdir_not_found(&input.cd));
        }
        Err(err) => {
            return Err(ToolError::new(
                ErrorCode::InternalError,
                "failed to stat working directory",
            )
            .with_data("path", input.cd.clone())
            .with_cause(err));
        }
    }

    for image in &input.image {
        match std::fs::metadata(image) {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::image_not_found(image));
            }
            Err(err) => {
                return Err(
                    ToolError::new(ErrorCode::InternalError, "failed to stat image file")
                        .with_data("path", image.clone())
                        .with_cause(err),
                );
            }
        }
    }

    let allowed_modes = cfg.security.allowed_sandbox_mode_names();
    let sandbox = match input.sandbox.as_deref().map(str::trim) {
        Some(provided) if !provided.is_empty() => provided
            .parse::<SandboxMode>()
            .map_err(|_| ToolError::invalid_sandbox_mode(provided, &allowed_modes))?,
        _ => cfg.security.default_sandbox,
    };
    if !cfg.security.is_sandbox_allowed(sandbox) {
        return Err(ToolError::invalid_sandbox_mode(
            sandbox.as_str(),
            &allowed_modes,
        ));
    }

    if !cfg.security.is_workdir_allowed(&input.cd) {
        return Err(
            ToolError::invalid_params("working directory is not allowed")
                .with_data("path", input.cd.clone()),
        );
    }

    let yolo = input.yolo.unwrap_or(false);
    if cfg.security.disable_yolo && yolo {
        return Err(ToolError::parameter_prohibited(
            "yolo",
            "yolo is disabled by server policy",
        ));
    }
    if !input.model.is_empty() && !cfg.security.is_model_allowed(&input.model) {
        return Err(ToolError::parameter_prohibited(
            "model",
            "model is not allowlisted by server configuration",
        ));
    }
    if !input.profile.is_empty() && !cfg.security.is_profile_allowed(&input.profile) {
        return Err(ToolError::parameter_prohibited(
            "profile",
            "profile is not allowlisted by server configuration",
        ));
    }

    let timeout = resolve_timeout(
        input.timeout_seconds,
        cfg.codex.default_timeout_seconds,
        cfg.codex.max_timeout_seconds,
    );
    let no_output_timeout = resolve_no_output_timeout(
        input.no_output_seconds,
        cfg.codex.default_no_output_timeout_seconds,
    );

    // Per-workspace mutual exclusion, keyed by the canonical repo root.
    let key = workdir_key(workdir).await;
    let guard = state
        .locks
        .acquire(
            &key,
            cfg.locks.workdir_lock_mode,
            Duration::from_secs(cfg.locks.queue_timeout_seconds),
            &state.shutdown,
        )
        .await?;
    let _guard = guard.ok_or_else(|| ToolError::workdir_busy(&key))?;

    let caller_supplied_id = !input.session_id.trim().is_empty();
    let mut tracking_id = if caller_supplied_id {
        input.session_id.trim().to_string()
    } else {
        new_temporary_id()
    };

    let cancel = state.shutdown.child_token();
    state
        .sessions
        .start(&tracking_id, &input.cd, sandbox, cancel.clone())?;
    state
        .sessions
        .append_diagnostic(&tracking_id, DiagnosticKind::System, "session started");

    let notifier = progress_token
        .map(|token| ProgressNotifier::new(state.outbound.clone(), token));
    let reporter = SessionReporter::new(state.sessions.clone(), tracking_id.clone(), notifier);

    let run_opts = RunOptions {
        prompt: input.prompt.clone(),
        working_dir: PathBuf::from(&input.cd),
        sandbox,
        session_id: if caller_supplied_id {
            tracking_id.clone()
        } else {
            String::new()
        },
        skip_git_repo_check: input.skip_git_repo_check.unwrap_or(true),
        return_all_messages: input.return_all_messages,
        image_paths: input.image.clone(),
        model: input.model.clone(),
        yolo,
        profile: input.profile.clone(),
        timeout,
        no_output_timeout,
        executable_path: executable_path(cfg),
        max_buffered_lines: cfg.codex.max_buffered_lines,
    };

    let run_started = Instant::now();
    let outcome = warden_codex::run(&cancel, run_opts, &reporter).await;
    let execution_time_ms = run_started.elapsed().as_millis() as i64;

    let result = match outcome {
        Err(err) => {
            if cancel.is_cancelled()
                && err.code != ErrorCode::CodexTimeout
                && err.code != ErrorCode::NoOutputTimeout
            {
                state.sessions.mark_cancelled(&tracking_id, "cancelled");
            } else {
                state.sessions.mark_failed(&tracking_id, &err);
            }
            return Err(err);
        }
        Ok(result) => result,
    };

    track_reported_thread_id(state, &mut tracking_id, caller_supplied_id, &result);

    if !result.success {
        let err = result
            .error
            .unwrap_or_else(|| ToolError::execution_failed("codex execution failed"));
        state.sessions.mark_failed(&tracking_id, &err);
        return Err(err);
    }

    state
        .sessions
        .mark_completed(&tracking_id, execution_time_ms, result.tool_call_count);

    let mut change_receipt = None;
    if input.return_diff {
        let receipt = warden_receipt::collect(
            workdir,
            CollectOptions {
                return_diff: true,
                ..CollectOptions::default()
            },
        )
        .await;
        state
            .sessions
            .set_change_receipt(&tracking_id, receipt.clone());
        change_receipt = Some(receipt);
    }

    let output = CodexOutput {
        success: true,
        session_id: result.session_id,
        agent_messages: result.agent_messages,
        all_messages: result.all_messages,
        execution_time_ms,
        tool_call_count: result.tool_call_count,
        change_receipt,
    };
    serde_json::to_value(&output)
        .map_err(|e| ToolError::new(ErrorCode::InternalError, "failed to serialize output").with_cause(e))
}

/// Replace a temporary tracking id with the agent-reported thread id. A
/// caller-supplied id stays authoritative; the observed thread id is only
/// recorded in diagnostics.
fn track_reported_thread_id(
    state: &ServerState,
    tracking_id: &mut String,
    caller_supplied_id: bool,
    result: &RunResult,
) {
    let reported = result.session_id.trim();
    if reported.is_empty() || reported == tracking_id.as_str() {
        return;
    }
    if caller_supplied_id {
        state.sessions.append_diagnostic(
            tracking_id,
            DiagnosticKind::System,
            &format!("codex reported thread_id {reported}"),
        );
        return;
    }
    if state
        .sessions
        .update_id(tracking_id, reported)
        .unwrap_or(false)
    {
        *tracking_id = reported.to_string();
    }
}

fn resolve_timeout(requested: Option<f64>, default_seconds: u64, max_seconds: u64) -> Duration {
    let mut seconds = default_seconds as f64;
    if let Some(t) = requested {
        if t.is_finite() && t > 0.0 {
            seconds = t;
        }
    }
    seconds = seconds.min(max_seconds as f64);
    Duration::from_secs_f64(seconds.max(0.0))
}

fn resolve_no_output_timeout(requested: Option<f64>, default_seconds: u64) -> Duration {
    match requested {
        Some(t) if t.is_finite() && t > 0.0 => Duration::from_secs_f64(t),
        // An explicit zero (or negative) disables the watchdog.
        Some(_) => Duration::ZERO,
        None => Duration::from_secs(default_seconds),
    }
}

fn executable_path(cfg: &warden_types::Config) -> Option<PathBuf> {
    let path = cfg.codex.executable_path.trim();
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

fn handle_stats(state: &ServerState) -> Result<Value, ToolError> {
    let uptime = Duration::from_secs(state.started_at.elapsed().as_secs());
    let output = StatsOutput {
        uptime: humantime::format_duration(uptime).to_string(),
        metrics: state.metrics.snapshot(),
    };
    to_structured(&output)
}

fn handle_list_sessions(state: &ServerState) -> Result<Value, ToolError> {
    to_structured(&ListSessionsOutput {
        sessions: state.sessions.list(),
    })
}

fn handle_get_session(state: &ServerState, arguments: Value) -> Result<Value, ToolError> {
    let input: SessionIdInput = serde_json::from_value(arguments)
        .map_err(|e| ToolError::invalid_params(format!("invalid input: {e}")))?;
    let session_id = input.session_id.trim();
    if session_id.is_empty() {
        return Err(ToolError::invalid_params("SESSION_ID is required"));
    }

    let session = state.sessions.get_detail(session_id, 20);
    to_structured(&GetSessionOutput {
        found: session.is_some(),
        session,
    })
}

fn handle_cancel_session(state: &ServerState, arguments: Value) -> Result<Value, ToolError> {
    let input: SessionIdInput = serde_json::from_value(arguments)
        .map_err(|e| ToolError::invalid_params(format!("invalid input: {e}")))?;
    let session_id = input.session_id.trim();
    if session_id.is_empty() {
        return Err(ToolError::invalid_params("SESSION_ID is required"));
    }

    let cancelled = state.sessions.cancel(session_id)?;
    to_structured(&CancelSessionOutput {
        cancelled,
        session: state.sessions.get(session_id),
    })
}

fn handle_tail_session(state: &ServerState, arguments: Value) -> Result<Value, ToolError> {
    let input: TailSessionInput = serde_json::from_value(arguments)
        .map_err(|e| ToolError::invalid_params(format!("invalid input: {e}")))?;
    let session_id = input.session_id.trim().to_string();
    if session_id.is_empty() {
        return Err(ToolError::invalid_params("SESSION_ID is required"));
    }

    let cursor = input
        .cursor
        .filter(|c| c.is_finite() && *c > 0.0)
        .map(|c| c as u64)
        .unwrap_or(0);
    let limit = input
        .limit
        .filter(|l| l.is_finite() && *l > 0.0)
        .map(|l| l as usize)
        .unwrap_or(0);

    let output = match state.sessions.tail_diagnostics(&session_id, cursor, limit) {
        Some(tail) => TailSessionOutput {
            found: true,
            session_id,
            state: Some(tail.state),
            entries: tail.entries,
            next_cursor: tail.next_cursor,
            dropped: tail.dropped,
            dropped_before: tail.dropped_before,
        },
        None => TailSessionOutput {
            found: false,
            session_id,
            state: None,
            entries: Vec::new(),
            next_cursor: cursor,
            dropped: false,
            dropped_before: 0,
        },
    };
    to_structured(&output)
}

fn to_structured<T: Serialize>(output: &T) -> Result<Value, ToolError> {
    serde_json::to_value(output).map_err(|e| {
        ToolError::new(ErrorCode::InternalError, "failed to serialize output").with_cause(e)
    })
}
