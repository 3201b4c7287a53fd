//! The stdio JSON-RPC server loop.
//!
//! One line in, one JSON-RPC message out. Tool calls run as their own
//! tasks so a `cancel_session` can land while a `codex` call streams;
//! responses and progress notifications funnel through a single writer
//! task. EOF on stdin cancels everything in flight and exits cleanly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use warden_session::{RegistryOptions, SessionRegistry};
use warden_types::{Config, ErrorCode, ToolError};

use crate::dispatch::handle_tools_call;
use crate::metrics::Metrics;
use crate::rpc::{JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
use crate::tools::tool_definitions;
use crate::workdir::WorkdirLocks;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state threaded through every tool call.
pub struct ServerState {
    pub config: Config,
    pub sessions: Arc<SessionRegistry>,
    pub locks: WorkdirLocks,
    pub metrics: Metrics,
    pub started_at: Instant,
    pub shutdown: CancellationToken,
    pub outbound: UnboundedSender<Value>,
}

pub struct McpServer {
    config: Config,
    shutdown: CancellationToken,
    sessions: Arc<SessionRegistry>,
}

impl McpServer {
    pub fn new(config: Config, shutdown: CancellationToken) -> Self {
        Self {
            config,
            shutdown,
            sessions: Arc::new(SessionRegistry::new(RegistryOptions::default())),
        }
    }

    /// Run the server until `stdin` reaches EOF.
    pub async fn run(
        self,
        stdin: impl AsyncBufRead + Unpin,
        stdout: impl AsyncWrite + Unpin + Send + 'static,
    ) -> anyhow::Result<()> {
        let (outbound, rx) = mpsc::unbounded_channel::<Value>();
        let writer = tokio::spawn(write_loop(stdout, rx));

        self.sessions
            .start_cleanup(self.shutdown.clone(), CLEANUP_INTERVAL);

        let state = Arc::new(ServerState {
            config: self.config,
            sessions: self.sessions,
            locks: WorkdirLocks::new(),
            metrics: Metrics::new(),
            started_at: Instant::now(),
            shutdown: self.shutdown.clone(),
            outbound,
        });

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut lines = stdin.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(line) {
                Ok(req) => req,
                Err(_) => {
                    let err = ToolError::new(ErrorCode::ParseError, "Parse error");
                    send(&state, JsonRpcResponse::error(Value::Null, &err));
                    continue;
                }
            };

            // Notifications are acknowledged silently, recognized or not.
            let Some(id) = request.id else {
                debug!(method = %request.method, "notification received");
                continue;
            };

            match request.method.as_str() {
                "initialize" => {
                    let result = serde_json::json!({
                        "protocolVersion": MCP_PROTOCOL_VERSION,
                        "capabilities": {"tools": {}},
                        "serverInfo": {
                            "name": state.config.server.name,
                            "version": state.config.server.version,
                        },
                    });
                    send(&state, JsonRpcResponse::result(id, result));
                }
                "tools/list" => {
                    let result = serde_json::json!({"tools": tool_definitions()});
                    send(&state, JsonRpcResponse::result(id, result));
                }
                "tools/call" => {
                    // Each call gets its own task so long codex runs do not
                    // block cancel_session or the readers.
                    let state = state.clone();
                    in_flight.spawn(async move {
                        let response = handle_tools_call(&state, id, request.params).await;
                        send(&state, response);
                    });
                }
                other => {
                    let err = ToolError::new(
                        ErrorCode::MethodNotFound,
                        format!("Method not found: {other}"),
                    );
                    send(&state, JsonRpcResponse::error(id, &err));
                }
            }
        }

        // EOF: the client is gone. Cancel in-flight work, then let the
        // writer drain whatever is queued.
        info!("stdin closed, shutting down");
        state.shutdown.cancel();
        while in_flight.join_next().await.is_some() {}
        drop(state);
        if let Err(err) = writer.await {
            warn!(%err, "writer task failed");
        }
        Ok(())
    }
}

fn send(state: &ServerState, response: JsonRpcResponse) {
    let _ = state.outbound.send(response.to_value());
}

async fn write_loop(mut stdout: impl AsyncWrite + Unpin, mut rx: UnboundedReceiver<Value>) {
    while let Some(message) = rx.recv().await {
        let mut line = message.to_string();
        line.push('\n');
        if stdout.write_all(line.as_bytes()).await.is_err() {
            return;
        }
        let _ = stdout.flush().await;
    }
}
