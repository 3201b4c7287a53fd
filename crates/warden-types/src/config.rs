//! Configuration model and loading.
//!
//! Precedence: built-in defaults < TOML config file (optional) < `CODEX_*`
//! environment variables. The loaded config is validated once and treated
//! as read-only for the life of the process.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::sandbox::SandboxMode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub codex: AgentConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_server_version")]
    pub version: String,
}

/// Settings for the supervised agent CLI. Timeouts are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub max_timeout_seconds: u64,
    #[serde(default)]
    pub default_no_output_timeout_seconds: u64,

    #[serde(default = "default_max_buffered_lines")]
    pub max_buffered_lines: usize,
    /// Explicit path to the agent executable; empty means "resolve on PATH".
    #[serde(default)]
    pub executable_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Model allowlist. Empty denies every non-empty value; `*` allows all.
    #[serde(default)]
    pub allowed_models: Vec<String>,
    /// Profile allowlist, same semantics as `allowed_models`.
    #[serde(default)]
    pub allowed_profiles: Vec<String>,
    #[serde(default)]
    pub default_sandbox: SandboxMode,
    #[serde(default = "default_allowed_sandbox_modes")]
    pub allowed_sandbox_modes: Vec<SandboxMode>,
    /// Allowed workdir prefixes. Empty allows every directory.
    #[serde(default)]
    pub allowed_work_dirs: Vec<String>,
    #[serde(default)]
    pub disable_yolo: bool,
}

/// Per-workspace mutual exclusion behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub workdir_lock_mode: WorkdirLockMode,
    #[serde(default = "default_queue_timeout_seconds")]
    pub queue_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkdirLockMode {
    /// Fail immediately with WorkdirBusy when the workspace is held.
    #[default]
    Reject,
    /// Wait up to `queue_timeout_seconds` for the workspace to free up.
    Queue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// json, text
    #[serde(default = "default_log_format")]
    pub format: String,
    /// stdout, stderr, file
    #[serde(default = "default_log_output")]
    pub output: String,
    /// Used when `output = "file"`.
    #[serde(default)]
    pub file_path: String,
}

fn default_server_name() -> String {
    "warden".to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_timeout_seconds() -> u64 {
    1800
}

fn default_max_buffered_lines() -> usize {
    100
}

fn default_allowed_sandbox_modes() -> Vec<SandboxMode> {
    vec![
        SandboxMode::ReadOnly,
        SandboxMode::WorkspaceWrite,
        SandboxMode::DangerFullAccess,
    ]
}

fn default_queue_timeout_seconds() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_log_output() -> String {
    "stderr".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_timeout_seconds(),
            max_timeout_seconds: default_timeout_seconds(),
            default_no_output_timeout_seconds: 0,
            max_buffered_lines: default_max_buffered_lines(),
            executable_path: String::new(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_models: Vec::new(),
            allowed_profiles: Vec::new(),
            default_sandbox: SandboxMode::ReadOnly,
            allowed_sandbox_modes: default_allowed_sandbox_modes(),
            allowed_work_dirs: Vec::new(),
            disable_yolo: false,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            workdir_lock_mode: WorkdirLockMode::Reject,
            queue_timeout_seconds: default_queue_timeout_seconds(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: default_log_output(),
            file_path: String::new(),
        }
    }
}

impl Config {
    /// Load configuration: defaults < file at `path` (if any) < environment.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut cfg = match path {
            Some(p) => {
                let data = std::fs::read_to_string(p).map_err(|e| {
                    ConfigError::Io(format!("read config file {}: {e}", p.display()))
                })?;
                toml::from_str::<Config>(&data)
                    .map_err(|e| ConfigError::Parse(format!("parse config file: {e}")))?
            }
            None => Config::default(),
        };

        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.name.trim().is_empty() {
            return Err(ConfigError::Invalid("server.name is required".into()));
        }
        if self.server.version.trim().is_empty() {
            return Err(ConfigError::Invalid("server.version is required".into()));
        }
        if self.codex.max_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "codex.max_timeout_seconds must be > 0".into(),
            ));
        }
        if self.security.allowed_sandbox_modes.is_empty() {
            return Err(ConfigError::Invalid(
                "security.allowed_sandbox_modes must not be empty".into(),
            ));
        }
        if !self
            .security
            .allowed_sandbox_modes
            .contains(&self.security.default_sandbox)
        {
            return Err(ConfigError::Invalid(format!(
                "security.default_sandbox {:?} must be included in security.allowed_sandbox_modes",
                self.security.default_sandbox.as_str()
            )));
        }
        if self
            .security
            .allowed_work_dirs
            .iter()
            .any(|d| d.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "security.allowed_work_dirs contains an empty entry".into(),
            ));
        }
        if self.logging.output.trim().eq_ignore_ascii_case("file")
            && self.logging.file_path.trim().is_empty()
        {
            return Err(ConfigError::Invalid(
                "logging.file_path is required when logging.output=file".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}")]
    Io(String),
    #[error("{0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl SecurityConfig {
    pub fn is_model_allowed(&self, model: &str) -> bool {
        is_allowlisted(&self.allowed_models, model)
    }

    pub fn is_profile_allowed(&self, profile: &str) -> bool {
        is_allowlisted(&self.allowed_profiles, profile)
    }

    pub fn is_sandbox_allowed(&self, mode: SandboxMode) -> bool {
        self.allowed_sandbox_modes.contains(&mode)
    }

    /// Whether `workdir` sits under one of the allowed prefixes.
    ///
    /// An empty prefix list allows everything; a prefix of `/` or `.`
    /// allows everything. The match is purely lexical, after cleaning.
    pub fn is_workdir_allowed(&self, workdir: &str) -> bool {
        if self.allowed_work_dirs.is_empty() {
            return true;
        }
        let path = clean_path(Path::new(workdir));
        for prefix in &self.allowed_work_dirs {
            let prefix = clean_path(Path::new(prefix));
            if prefix == Path::new(".") || prefix == Path::new("/") {
                return true;
            }
            if path == prefix || path.starts_with(&prefix) {
                return true;
            }
        }
        false
    }

    /// Validated sandbox modes in wire form, for error payloads.
    pub fn allowed_sandbox_mode_names(&self) -> Vec<&'static str> {
        self.allowed_sandbox_modes
            .iter()
            .map(|m| m.as_str())
            .collect()
    }
}

fn is_allowlisted(allowlist: &[String], value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    if allowlist.is_empty() {
        return false;
    }
    allowlist
        .iter()
        .map(|a| a.trim())
        .any(|a| a == "*" || a == value)
}

/// Lexical path cleaning: drop `.` components and fold `..` where possible.
///
/// Unlike [`std::fs::canonicalize`] this never touches the filesystem, so it
/// works for paths that do not exist yet.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

impl From<ConfigError> for ToolError {
    fn from(err: ConfigError) -> Self {
        ToolError::new(crate::error::ErrorCode::InternalError, err.to_string())
    }
}
