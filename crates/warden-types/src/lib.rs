//! Shared types for the warden server.
//!
//! This crate holds everything the other warden crates agree on without
//! needing each other: the structured error taxonomy with stable numeric
//! codes, the sandbox policy enum, and the configuration model (TOML file,
//! environment overrides, and the safe-local preset).

pub mod config;
pub mod error;
pub mod sandbox;

mod env;
mod safe_local;

pub use config::{
    AgentConfig, Config, LockConfig, LoggingConfig, SecurityConfig, ServerConfig, WorkdirLockMode,
};
pub use error::{ErrorCode, ToolError};
pub use safe_local::apply_safe_local_preset;
pub use sandbox::SandboxMode;
