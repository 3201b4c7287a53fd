//! Structured error taxonomy with stable numeric codes.
//!
//! Every failure that crosses the tool boundary is a [`ToolError`]: a
//! numeric code from the JSON-RPC reserved range, a short human message,
//! and an open map of machine-readable diagnostic fields. The `Display`
//! form serializes the whole payload as JSON so the code survives even
//! when the error is flattened into plain text.

use std::fmt;

use serde_json::{Map, Value};

/// Stable numeric error code.
///
/// JSON-RPC reserves -32768..-32000 for system errors; server-defined
/// codes live in -32099..-32000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // JSON-RPC standard codes.
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,

    // Server-defined codes.
    CodexNotFound,
    CodexTimeout,
    CodexExecutionFailed,
    WorkdirNotFound,
    WorkdirNotDirectory,
    ImageNotFound,
    InvalidSandboxMode,
    ParameterProhibited,
    SessionNotFound,
    NoOutputTimeout,
    SessionLimitExceeded,
    WorkdirBusy,
}

impl ErrorCode {
    /// The numeric wire code.
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::CodexNotFound => -32001,
            ErrorCode::CodexTimeout => -32002,
            ErrorCode::CodexExecutionFailed => -32003,
            ErrorCode::WorkdirNotFound => -32004,
            ErrorCode::WorkdirNotDirectory => -32005,
            ErrorCode::ImageNotFound => -32006,
            ErrorCode::InvalidSandboxMode => -32007,
            ErrorCode::ParameterProhibited => -32008,
            ErrorCode::SessionNotFound => -32009,
            ErrorCode::NoOutputTimeout => -32010,
            ErrorCode::SessionLimitExceeded => -32011,
            ErrorCode::WorkdirBusy => -32012,
        }
    }

    /// Stable string identifier for the code.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "ParseError",
            ErrorCode::InvalidRequest => "InvalidRequest",
            ErrorCode::MethodNotFound => "MethodNotFound",
            ErrorCode::InvalidParams => "InvalidParams",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::CodexNotFound => "CodexNotFound",
            ErrorCode::CodexTimeout => "CodexTimeout",
            ErrorCode::CodexExecutionFailed => "CodexExecutionFailed",
            ErrorCode::WorkdirNotFound => "WorkdirNotFound",
            ErrorCode::WorkdirNotDirectory => "WorkdirNotDirectory",
            ErrorCode::ImageNotFound => "ImageNotFound",
            ErrorCode::InvalidSandboxMode => "InvalidSandboxMode",
            ErrorCode::ParameterProhibited => "ParameterProhibited",
            ErrorCode::SessionNotFound => "SessionNotFound",
            ErrorCode::NoOutputTimeout => "NoOutputTimeout",
            ErrorCode::SessionLimitExceeded => "SessionLimitExceeded",
            ErrorCode::WorkdirBusy => "WorkdirBusy",
        }
    }
}

/// Structured error carried across the tool boundary.
#[derive(Debug)]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
    pub data: Map<String, Value>,

    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::error::Error for ToolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Map::new(),
            cause: None,
        }
    }

    /// Attach a structured diagnostic field.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Attach the wrapped root cause (server-side only, never serialized).
    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Serialize as the wire object: `{code, name, message, data?}`.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("code".into(), Value::from(self.code.code()));
        obj.insert("name".into(), Value::from(self.code.name()));
        obj.insert("message".into(), Value::from(self.message.clone()));
        if !self.data.is_empty() {
            obj.insert("data".into(), Value::Object(self.data.clone()));
        }
        Value::Object(obj)
    }

    // -- Constructors for the common taxonomy entries ----------------------

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn codex_not_found(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorCode::CodexNotFound, "codex executable not found in PATH").with_cause(cause)
    }

    pub fn codex_timeout(timeout_seconds: u64) -> Self {
        Self::new(ErrorCode::CodexTimeout, "codex execution timed out")
            .with_data("timeout_seconds", timeout_seconds)
    }

    pub fn no_output_timeout(timeout_seconds: u64) -> Self {
        Self::new(ErrorCode::NoOutputTimeout, "no output received within timeout")
            .with_data("timeout_seconds", timeout_seconds)
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CodexExecutionFailed, message)
    }

    pub fn workdir_not_found(path: impl Into<String>) -> Self {
        Self::new(ErrorCode::WorkdirNotFound, "working directory does not exist")
            .with_data("path", path.into())
    }

    pub fn workdir_not_directory(path: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::WorkdirNotDirectory,
            "working directory is not a directory",
        )
        .with_data("path", path.into())
    }

    pub fn image_not_found(path: impl Into<String>) -> Self {
        Self::new(ErrorCode::ImageNotFound, "image file does not exist")
            .with_data("path", path.into())
    }

    pub fn invalid_sandbox_mode(provided: impl Into<String>, valid: &[&str]) -> Self {
        Self::new(ErrorCode::InvalidSandboxMode, "invalid sandbox mode")
            .with_data("provided", provided.into())
            .with_data("valid_modes", valid.iter().map(|m| Value::from(*m)).collect::<Vec<_>>())
    }

    pub fn parameter_prohibited(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParameterProhibited, "parameter is prohibited")
            .with_data("parameter", parameter.into())
            .with_data("reason", reason.into())
    }

    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::new(ErrorCode::SessionNotFound, "session not found")
            .with_data("SESSION_ID", session_id.into())
    }

    pub fn session_limit_exceeded(max_running: usize, running: usize) -> Self {
        Self::new(ErrorCode::SessionLimitExceeded, "too many concurrent sessions")
            .with_data("max_running", max_running)
            .with_data("running", running)
    }

    pub fn workdir_busy(key: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::WorkdirBusy,
            "another session is running in this workspace",
        )
        .with_data("workdir_key", key.into())
    }
}

impl Clone for ToolError {
    fn clone(&self) -> Self {
        // The cause is server-side context only; it does not survive a clone.
        Self {
            code: self.code,
            message: self.message.clone(),
            data: self.data.clone(),
            cause: None,
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.to_value()) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(
                f,
                "[{} {}] {}",
                self.code.code(),
                self.code.name(),
                self.message
            ),
        }
    }
}
