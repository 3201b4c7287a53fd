//! Environment variable overrides for [`Config`].
//!
//! Environment values win over the config file. Unparseable numeric or
//! boolean values are ignored rather than aborting startup; an invalid
//! sandbox mode is left for `validate()` to reject.

use std::str::FromStr;

use crate::config::Config;
use crate::sandbox::SandboxMode;

const ENV_SERVER_NAME: &str = "CODEX_MCP_SERVER_NAME";
const ENV_SERVER_VERSION: &str = "CODEX_MCP_VERSION";

const ENV_DEFAULT_TIMEOUT: &str = "CODEX_DEFAULT_TIMEOUT";
const ENV_MAX_TIMEOUT: &str = "CODEX_MAX_TIMEOUT";
const ENV_NO_OUTPUT_TIMEOUT: &str = "CODEX_NO_OUTPUT_TIMEOUT";
const ENV_MAX_BUFFERED_LINES: &str = "CODEX_MAX_BUFFERED_LINES";
const ENV_EXECUTABLE_PATH: &str = "CODEX_EXECUTABLE_PATH";

const ENV_ALLOWED_MODELS: &str = "CODEX_ALLOWED_MODELS";
const ENV_ALLOWED_PROFILES: &str = "CODEX_ALLOWED_PROFILES";
const ENV_DEFAULT_SANDBOX: &str = "CODEX_DEFAULT_SANDBOX";
const ENV_ALLOWED_SANDBOX_MODES: &str = "CODEX_ALLOWED_SANDBOX_MODES";
const ENV_ALLOWED_WORK_DIRS: &str = "CODEX_ALLOWED_WORK_DIRS";
const ENV_DISABLE_YOLO: &str = "CODEX_DISABLE_YOLO";

const ENV_WORKDIR_LOCK_MODE: &str = "CODEX_WORKDIR_LOCK_MODE";
const ENV_WORKDIR_LOCK_QUEUE_TIMEOUT: &str = "CODEX_WORKDIR_LOCK_QUEUE_TIMEOUT";

const ENV_LOG_LEVEL: &str = "CODEX_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "CODEX_LOG_FORMAT";
const ENV_LOG_OUTPUT: &str = "CODEX_LOG_OUTPUT";
const ENV_LOG_FILE: &str = "CODEX_LOG_FILE";

impl Config {
    pub fn apply_env(&mut self) {
        if let Some(v) = read_env(ENV_SERVER_NAME) {
            self.server.name = v;
        }
        if let Some(v) = read_env(ENV_SERVER_VERSION) {
            self.server.version = v;
        }

        if let Some(v) = read_parsed::<u64>(ENV_DEFAULT_TIMEOUT) {
            self.codex.default_timeout_seconds = v;
        }
        if let Some(v) = read_parsed::<u64>(ENV_MAX_TIMEOUT) {
            self.codex.max_timeout_seconds = v;
        }
        if let Some(v) = read_parsed::<u64>(ENV_NO_OUTPUT_TIMEOUT) {
            self.codex.default_no_output_timeout_seconds = v;
        }
        if let Some(v) = read_parsed::<usize>(ENV_MAX_BUFFERED_LINES) {
            self.codex.max_buffered_lines = v;
        }
        if let Some(v) = read_env(ENV_EXECUTABLE_PATH) {
            self.codex.executable_path = v;
        }

        if let Some(v) = read_csv_env(ENV_ALLOWED_MODELS) {
            self.security.allowed_models = v;
        }
        if let Some(v) = read_csv_env(ENV_ALLOWED_PROFILES) {
            self.security.allowed_profiles = v;
        }
        if let Some(v) = read_parsed::<SandboxMode>(ENV_DEFAULT_SANDBOX) {
            self.security.default_sandbox = v;
        }
        if let Some(v) = read_csv_env(ENV_ALLOWED_SANDBOX_MODES) {
            let modes: Vec<SandboxMode> =
                v.iter().filter_map(|m| m.parse().ok()).collect();
            if !modes.is_empty() {
                self.security.allowed_sandbox_modes = modes;
            }
        }
        if let Some(v) = read_csv_env(ENV_ALLOWED_WORK_DIRS) {
            self.security.allowed_work_dirs = v;
        }
        if let Some(v) = read_parsed::<bool>(ENV_DISABLE_YOLO) {
            self.security.disable_yolo = v;
        }

        if let Some(v) = read_env(ENV_WORKDIR_LOCK_MODE) {
            match v.to_ascii_lowercase().as_str() {
                "reject" => self.locks.workdir_lock_mode = crate::config::WorkdirLockMode::Reject,
                "queue" => self.locks.workdir_lock_mode = crate::config::WorkdirLockMode::Queue,
                _ => {}
            }
        }
        if let Some(v) = read_parsed::<u64>(ENV_WORKDIR_LOCK_QUEUE_TIMEOUT) {
            self.locks.queue_timeout_seconds = v;
        }

        if let Some(v) = read_env(ENV_LOG_LEVEL) {
            self.logging.level = v;
        }
        if let Some(v) = read_env(ENV_LOG_FORMAT) {
            self.logging.format = v;
        }
        if let Some(v) = read_env(ENV_LOG_OUTPUT) {
            self.logging.output = v;
        }
        if let Some(v) = read_env(ENV_LOG_FILE) {
            self.logging.file_path = v;
        }
    }
}

fn read_env(key: &str) -> Option<String> {
    let v = std::env::var(key).ok()?;
    let v = v.trim();
    if v.is_empty() {
        return None;
    }
    Some(v.to_string())
}

fn read_parsed<T: FromStr>(key: &str) -> Option<T> {
    read_env(key)?.parse().ok()
}

fn read_csv_env(key: &str) -> Option<Vec<String>> {
    let raw = read_env(key)?;
    let parts: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts)
}

/// Serializes tests that read or mutate the process environment.
#[cfg(test)]
pub(crate) fn env_test_lock() -> &'static std::sync::Mutex<()> {
    static LOCK: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    LOCK.get_or_init(|| std::sync::Mutex::new(()))
}
