//! Sandbox policy for model-generated commands.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sandbox policy passed through to the agent CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SandboxMode {
    /// The agent may read the workspace but not modify it.
    #[default]
    #[serde(rename = "read-only")]
    ReadOnly,
    /// The agent may write inside the workspace root.
    #[serde(rename = "workspace-write")]
    WorkspaceWrite,
    /// No sandboxing at all.
    #[serde(rename = "danger-full-access")]
    DangerFullAccess,
}

/// All recognized sandbox modes, in wire form.
pub const VALID_SANDBOX_MODES: [&str; 3] =
    ["read-only", "workspace-write", "danger-full-access"];

impl SandboxMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SandboxMode::ReadOnly => "read-only",
            SandboxMode::WorkspaceWrite => "workspace-write",
            SandboxMode::DangerFullAccess => "danger-full-access",
        }
    }
}

impl fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SandboxMode {
    type Err = UnknownSandboxMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read-only" => Ok(SandboxMode::ReadOnly),
            "workspace-write" => Ok(SandboxMode::WorkspaceWrite),
            "danger-full-access" => Ok(SandboxMode::DangerFullAccess),
            other => Err(UnknownSandboxMode {
                provided: other.to_string(),
            }),
        }
    }
}

/// Error returned when parsing an unrecognized sandbox mode string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown sandbox mode {provided:?}: must be one of read-only, workspace-write, danger-full-access")]
pub struct UnknownSandboxMode {
    pub provided: String,
}
