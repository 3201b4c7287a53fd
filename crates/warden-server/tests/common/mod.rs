//! Test harness: an in-memory MCP client talking to a real server over a
//! duplex pipe, plus fake codex executables.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

use warden_server::McpServer;
use warden_types::Config;

pub struct TestClient {
    writer: WriteHalf<DuplexStream>,
    reader: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
    /// Progress notifications observed while waiting for responses.
    pub notifications: Vec<Value>,
}

impl TestClient {
    /// Spawn a server with `config` and connect to it.
    pub fn start(config: Config) -> Self {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let server = McpServer::new(config, CancellationToken::new());
        tokio::spawn(server.run(BufReader::new(server_read), server_write));

        let (client_read, client_write) = tokio::io::split(client_io);
        Self {
            writer: client_write,
            reader: BufReader::new(client_read).lines(),
            notifications: Vec::new(),
        }
    }

    pub async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("write request");
    }

    /// Next non-notification message.
    pub async fn recv_response(&mut self) -> Value {
        loop {
            let line = self
                .reader
                .next_line()
                .await
                .expect("read response")
                .expect("server closed the stream");
            let value: Value = serde_json::from_str(&line).expect("response is JSON");
            if value.get("method").is_some() {
                self.notifications.push(value);
                continue;
            }
            return value;
        }
    }

    /// Read responses until the one with `id` arrives. Responses for other
    /// in-flight requests are discarded.
    pub async fn recv_response_for(&mut self, id: i64) -> Value {
        loop {
            let response = self.recv_response().await;
            if response["id"] == json!(id) {
                return response;
            }
        }
    }

    /// Collect the responses for two concurrent requests, whatever order
    /// they arrive in.
    pub async fn recv_pair(&mut self, id_a: i64, id_b: i64) -> (Value, Value) {
        let mut a = None;
        let mut b = None;
        while a.is_none() || b.is_none() {
            let response = self.recv_response().await;
            if response["id"] == json!(id_a) {
                a = Some(response);
            } else if response["id"] == json!(id_b) {
                b = Some(response);
            }
        }
        (a.expect("first response"), b.expect("second response"))
    }

    pub async fn call(&mut self, id: i64, tool: &str, arguments: Value) -> Value {
        self.send(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": tool, "arguments": arguments},
            "id": id,
        }))
        .await;
        self.recv_response_for(id).await
    }

    pub async fn call_with_progress(
        &mut self,
        id: i64,
        tool: &str,
        arguments: Value,
        token: &str,
    ) -> Value {
        self.send(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {
                "name": tool,
                "arguments": arguments,
                "_meta": {"progressToken": token},
            },
            "id": id,
        }))
        .await;
        self.recv_response_for(id).await
    }
}

/// Write an executable fake codex script into `dir` and return its path.
#[cfg(unix)]
pub fn fake_codex(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("codex");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake codex");
    let mut perms = std::fs::metadata(&path).expect("stat").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path
}

/// A fake codex emitting a healthy two-line stream after a short delay.
#[cfg(unix)]
pub const HAPPY_BODY: &str = r#"sleep 0.05
printf '%s\n' '{"thread_id":"t-123","item":{"type":"tool_call","name":"x"}}'
printf '%s\n' '{"thread_id":"t-123","item":{"type":"agent_message","text":"hello from codex"}}'"#;

/// Config wired to a fake codex executable.
pub fn config_with_executable(path: &Path) -> Config {
    let mut config = Config::default();
    config.codex.executable_path = path.display().to_string();
    config
}

/// Structured error assertions.
pub fn assert_error(response: &Value, code: i64, name: &str) {
    assert!(
        response.get("result").is_none(),
        "expected an error, got: {response}"
    );
    assert_eq!(response["error"]["code"], code, "in {response}");
    assert_eq!(response["error"]["name"], name, "in {response}");
}

pub fn structured(response: &Value) -> &Value {
    response
        .get("result")
        .and_then(|r| r.get("structuredContent"))
        .unwrap_or_else(|| panic!("no structuredContent in {response}"))
}
