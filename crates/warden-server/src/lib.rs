//! The warden MCP server: supervised codex sessions behind a stdio
//! JSON-RPC tool interface.
//!
//! # Architecture
//!
//! - [`rpc`]: JSON-RPC 2.0 message types
//! - [`server`]: the stdio loop, writer task, and shared state
//! - [`tools`]: published tool schemas and annotations
//! - [`dispatch`]: input validation and the codex call flow
//! - [`workdir`]: canonical workspace keys and per-workspace locks
//! - [`progress`]: fan-out of supervisor progress to notifications and
//!   session diagnostics
//! - [`metrics`]: aggregate request metrics
//! - [`logging`]: tracing setup and request ids

pub mod dispatch;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod rpc;
pub mod server;
pub mod tools;
pub mod workdir;

pub use server::McpServer;
