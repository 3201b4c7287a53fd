//! End-to-end scenarios: a real server, a fake codex, a duplex transport.

#![cfg(unix)]

mod common;

use std::time::Duration;

use serde_json::{json, Value};

use common::{
    assert_error, config_with_executable, fake_codex, structured, TestClient, HAPPY_BODY,
};

fn tmpdir() -> tempfile::TempDir {
    tempfile::tempdir().expect("tempdir")
}

#[tokio::test]
async fn initialize_and_tools_list() {
    let mut client = TestClient::start(warden_types::Config::default());

    client
        .send(json!({"jsonrpc": "2.0", "method": "initialize", "id": 1}))
        .await;
    let init = client.recv_response_for(1).await;
    assert_eq!(init["result"]["serverInfo"]["name"], "warden");
    assert!(init["result"]["capabilities"]["tools"].is_object());

    client
        .send(json!({"jsonrpc": "2.0", "method": "tools/list", "id": 2}))
        .await;
    let list = client.recv_response_for(2).await;
    let tools = list["result"]["tools"].as_array().expect("tools array");
    assert_eq!(tools.len(), 6);
    assert!(tools.iter().any(|t| t["name"] == "codex"));
}

#[tokio::test]
async fn unknown_method_and_parse_error() {
    let mut client = TestClient::start(warden_types::Config::default());

    client
        .send(json!({"jsonrpc": "2.0", "method": "bogus/method", "id": 1}))
        .await;
    let resp = client.recv_response_for(1).await;
    assert_eq!(resp["error"]["code"], -32601);

    client.send(Value::String("not json".into())).await;
    let resp = client.recv_response().await;
    assert_eq!(resp["error"]["code"], -32700);
    assert_eq!(resp["id"], Value::Null);
}

#[tokio::test]
async fn happy_path_returns_structured_output() {
    let dir = tmpdir();
    let exe = fake_codex(dir.path(), HAPPY_BODY);
    let mut client = TestClient::start(config_with_executable(&exe));

    let workdir = tmpdir();
    let response = client
        .call(
            1,
            "codex",
            json!({"PROMPT": "hi", "cd": workdir.path().to_str().unwrap()}),
        )
        .await;

    let out = structured(&response);
    assert_eq!(out["success"], true, "in {response}");
    assert_eq!(out["SESSION_ID"], "t-123");
    assert_eq!(out["agent_messages"], "hello from codex");
    assert_eq!(out["tool_call_count"], 1);
    assert!(out["execution_time_ms"].as_i64().unwrap() > 0);
    assert!(out.get("all_messages").is_none());

    // The text content mirrors the agent's reply.
    assert_eq!(
        response["result"]["content"][0]["text"],
        "hello from codex"
    );
}

#[tokio::test]
async fn invalid_sandbox_mode_is_rejected() {
    let dir = tmpdir();
    let exe = fake_codex(dir.path(), HAPPY_BODY);
    let mut client = TestClient::start(config_with_executable(&exe));

    let workdir = tmpdir();
    let response = client
        .call(
            1,
            "codex",
            json!({
                "PROMPT": "hi",
                "cd": workdir.path().to_str().unwrap(),
                "sandbox": "network-only",
            }),
        )
        .await;
    assert_error(&response, -32007, "InvalidSandboxMode");
    assert_eq!(response["error"]["data"]["provided"], "network-only");
    assert!(response["error"]["data"]["valid_modes"].is_array());
}

#[tokio::test]
async fn missing_executable_is_codex_not_found() {
    let dir = tmpdir();
    let mut config = warden_types::Config::default();
    config.codex.executable_path = dir.path().join("missing").display().to_string();
    let mut client = TestClient::start(config);

    let workdir = tmpdir();
    let response = client
        .call(
            1,
            "codex",
            json!({"PROMPT": "hi", "cd": workdir.path().to_str().unwrap()}),
        )
        .await;
    assert_error(&response, -32001, "CodexNotFound");
}

#[tokio::test]
async fn workdir_validation_errors() {
    let mut client = TestClient::start(warden_types::Config::default());

    let response = client
        .call(1, "codex", json!({"PROMPT": "hi", "cd": "/no/such/dir"}))
        .await;
    assert_error(&response, -32004, "WorkdirNotFound");
    assert_eq!(response["error"]["data"]["path"], "/no/such/dir");

    let file = tempfile::NamedTempFile::new().unwrap();
    let response = client
        .call(
            2,
            "codex",
            json!({"PROMPT": "hi", "cd": file.path().to_str().unwrap()}),
        )
        .await;
    assert_error(&response, -32005, "WorkdirNotDirectory");

    let workdir = tmpdir();
    let response = client
        .call(
            3,
            "codex",
            json!({
                "PROMPT": "hi",
                "cd": workdir.path().to_str().unwrap(),
                "image": ["/no/such/image.png"],
            }),
        )
        .await;
    assert_error(&response, -32006, "ImageNotFound");
}

#[tokio::test]
async fn prohibited_parameters() {
    let dir = tmpdir();
    let exe = fake_codex(dir.path(), HAPPY_BODY);
    let mut config = config_with_executable(&exe);
    config.security.disable_yolo = true;
    let mut client = TestClient::start(config);

    let workdir = tmpdir();
    let cd = workdir.path().to_str().unwrap();

    let response = client
        .call(1, "codex", json!({"PROMPT": "hi", "cd": cd, "yolo": true}))
        .await;
    assert_error(&response, -32008, "ParameterProhibited");
    assert_eq!(response["error"]["data"]["parameter"], "yolo");

    // Empty model allowlist denies every non-empty model.
    let response = client
        .call(2, "codex", json!({"PROMPT": "hi", "cd": cd, "model": "gpt-5"}))
        .await;
    assert_error(&response, -32008, "ParameterProhibited");
    assert_eq!(response["error"]["data"]["parameter"], "model");
}

#[tokio::test]
async fn workdir_outside_allowed_prefixes() {
    let dir = tmpdir();
    let exe = fake_codex(dir.path(), HAPPY_BODY);
    let mut config = config_with_executable(&exe);
    config.security.allowed_work_dirs = vec!["/definitely/elsewhere".into()];
    let mut client = TestClient::start(config);

    let workdir = tmpdir();
    let response = client
        .call(
            1,
            "codex",
            json!({"PROMPT": "hi", "cd": workdir.path().to_str().unwrap()}),
        )
        .await;
    assert_error(&response, -32602, "InvalidParams");
    assert_eq!(
        response["error"]["data"]["path"],
        workdir.path().to_str().unwrap()
    );
}

#[tokio::test]
async fn no_output_watchdog_fires() {
    let dir = tmpdir();
    let exe = fake_codex(dir.path(), "sleep 30");
    let mut client = TestClient::start(config_with_executable(&exe));

    let workdir = tmpdir();
    let response = client
        .call(
            1,
            "codex",
            json!({
                "PROMPT": "hi",
                "cd": workdir.path().to_str().unwrap(),
                "no_output_seconds": 0.2,
                "timeout_seconds": 10,
            }),
        )
        .await;
    assert_error(&response, -32010, "NoOutputTimeout");
}

#[tokio::test]
async fn total_timeout_fires() {
    let dir = tmpdir();
    let exe = fake_codex(
        dir.path(),
        r#"printf '%s\n' '{"thread_id":"t-1"}'
sleep 30"#,
    );
    let mut client = TestClient::start(config_with_executable(&exe));

    let workdir = tmpdir();
    let response = client
        .call(
            1,
            "codex",
            json!({
                "PROMPT": "hi",
                "cd": workdir.path().to_str().unwrap(),
                "timeout_seconds": 0.2,
            }),
        )
        .await;
    assert_error(&response, -32002, "CodexTimeout");
}

#[tokio::test]
async fn cancel_session_interrupts_a_running_call() {
    let dir = tmpdir();
    let exe = fake_codex(
        dir.path(),
        r#"printf '%s\n' '{"thread_id":"s1"}'
sleep 30"#,
    );
    let mut client = TestClient::start(config_with_executable(&exe));

    let workdir = tmpdir();
    client
        .send(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {
                "name": "codex",
                "arguments": {
                    "PROMPT": "hi",
                    "cd": workdir.path().to_str().unwrap(),
                    "SESSION_ID": "s1",
                },
            },
            "id": 1,
        }))
        .await;

    // Wait until the session is registered and running.
    let mut running = false;
    for attempt in 0..50 {
        let response = client
            .call(100 + attempt, "get_session", json!({"SESSION_ID": "s1"}))
            .await;
        if structured(&response)["found"] == true
            && structured(&response)["session"]["state"] == "running"
        {
            running = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(running, "session never reached running state");

    client
        .send(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "cancel_session", "arguments": {"SESSION_ID": "s1"}},
            "id": 2,
        }))
        .await;

    let (codex_response, cancel_response) = client.recv_pair(1, 2).await;
    assert_eq!(structured(&cancel_response)["cancelled"], true);
    assert!(
        codex_response.get("error").is_some(),
        "cancelled codex call must fail: {codex_response}"
    );

    let response = client
        .call(3, "get_session", json!({"SESSION_ID": "s1"}))
        .await;
    assert_eq!(structured(&response)["session"]["state"], "cancelled");
    assert_eq!(
        structured(&response)["session"]["error"],
        "cancel requested"
    );
}

#[tokio::test]
async fn overlapping_calls_same_workspace_reject() {
    let dir = tmpdir();
    let exe = fake_codex(
        dir.path(),
        &format!("sleep 1\n{}", HAPPY_BODY.trim_start_matches("sleep 0.05\n")),
    );
    let mut client = TestClient::start(config_with_executable(&exe));

    let workdir = tmpdir();
    let cd = workdir.path().to_str().unwrap();

    client
        .send(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "codex", "arguments": {"PROMPT": "one", "cd": cd}},
            "id": 1,
        }))
        .await;
    // Give the first call time to take the workspace lock.
    tokio::time::sleep(Duration::from_millis(200)).await;
    client
        .send(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": {"name": "codex", "arguments": {"PROMPT": "two", "cd": cd}},
            "id": 2,
        }))
        .await;

    let (first, second) = client.recv_pair(1, 2).await;
    assert!(first.get("result").is_some(), "first call succeeds: {first}");
    assert_error(&second, -32012, "WorkdirBusy");
}

#[tokio::test]
async fn change_receipt_captured_on_request() {
    if which::which("git").is_err() {
        return;
    }
    let dir = tmpdir();
    let exe = fake_codex(dir.path(), HAPPY_BODY);
    let mut client = TestClient::start(config_with_executable(&exe));

    // Repo with one tracked file modified but unstaged.
    let repo = tmpdir();
    let run = |args: &[&str]| {
        let status = std::process::Command::new("git")
            .arg("-C")
            .arg(repo.path())
            .args(args)
            .status()
            .expect("git");
        assert!(status.success());
    };
    run(&["init", "-q"]);
    run(&["config", "user.email", "t@example.com"]);
    run(&["config", "user.name", "T"]);
    std::fs::write(repo.path().join("lib.rs"), "pub fn a() {}\n").unwrap();
    run(&["add", "."]);
    run(&["commit", "-q", "-m", "init"]);
    std::fs::write(repo.path().join("lib.rs"), "pub fn a() {}\npub fn b() {}\n").unwrap();

    let response = client
        .call(
            1,
            "codex",
            json!({
                "PROMPT": "hi",
                "cd": repo.path().to_str().unwrap(),
                "return_diff": true,
            }),
        )
        .await;

    let receipt = &structured(&response)["change_receipt"];
    assert_eq!(receipt["receipt_available"], true, "in {response}");
    assert!(receipt["changed_files"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c["path"] == "lib.rs"));
    assert!(!receipt["diff"].as_str().unwrap().is_empty());

    // The receipt is also retained on the session record.
    let session = client
        .call(2, "get_session", json!({"SESSION_ID": "t-123"}))
        .await;
    assert_eq!(
        structured(&session)["session"]["change_receipt"]["receipt_available"],
        true
    );
}

#[tokio::test]
async fn progress_notifications_flow_for_token() {
    let dir = tmpdir();
    let exe = fake_codex(dir.path(), HAPPY_BODY);
    let mut client = TestClient::start(config_with_executable(&exe));

    let workdir = tmpdir();
    let response = client
        .call_with_progress(
            1,
            "codex",
            json!({"PROMPT": "hi", "cd": workdir.path().to_str().unwrap()}),
            "tok-9",
        )
        .await;
    assert!(response.get("result").is_some());

    let progress: Vec<&Value> = client
        .notifications
        .iter()
        .filter(|n| n["method"] == "notifications/progress")
        .collect();
    assert!(!progress.is_empty(), "expected progress notifications");
    for n in &progress {
        assert_eq!(n["params"]["progressToken"], "tok-9");
    }
    // The counter is strictly increasing.
    let values: Vec<i64> = progress
        .iter()
        .map(|n| n["params"]["progress"].as_i64().unwrap())
        .collect();
    for pair in values.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    // Milestones made it through the fan-out.
    assert!(progress
        .iter()
        .any(|n| n["params"]["message"] == "starting codex"));
}

#[tokio::test]
async fn temporary_id_renamed_to_thread_id() {
    let dir = tmpdir();
    let exe = fake_codex(dir.path(), HAPPY_BODY);
    let mut client = TestClient::start(config_with_executable(&exe));

    let workdir = tmpdir();
    client
        .call(
            1,
            "codex",
            json!({"PROMPT": "hi", "cd": workdir.path().to_str().unwrap()}),
        )
        .await;

    let list = client.call(2, "list_sessions", json!({})).await;
    let sessions = structured(&list)["sessions"].as_array().unwrap().clone();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["SESSION_ID"], "t-123");
    assert_eq!(sessions[0]["state"], "completed");
}

#[tokio::test]
async fn tail_session_pages_through_diagnostics() {
    let dir = tmpdir();
    let exe = fake_codex(dir.path(), HAPPY_BODY);
    let mut client = TestClient::start(config_with_executable(&exe));

    let workdir = tmpdir();
    client
        .call(
            1,
            "codex",
            json!({"PROMPT": "hi", "cd": workdir.path().to_str().unwrap()}),
        )
        .await;

    let first = client
        .call(2, "tail_session", json!({"SESSION_ID": "t-123", "limit": 2}))
        .await;
    let out = structured(&first);
    assert_eq!(out["found"], true);
    assert_eq!(out["entries"].as_array().unwrap().len(), 2);
    let next = out["next_cursor"].as_u64().unwrap();
    assert!(next >= 2);

    let second = client
        .call(
            3,
            "tail_session",
            json!({"SESSION_ID": "t-123", "cursor": next}),
        )
        .await;
    let out2 = structured(&second);
    let entries = out2["entries"].as_array().unwrap();
    assert!(entries.iter().all(|e| e["seq"].as_u64().unwrap() > next));

    // Both progress milestones and raw output lines are in the trail.
    let all = client
        .call(4, "tail_session", json!({"SESSION_ID": "t-123"}))
        .await;
    let kinds: Vec<String> = structured(&all)["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["kind"].as_str().unwrap().to_string())
        .collect();
    assert!(kinds.iter().any(|k| k == "progress"));
    assert!(kinds.iter().any(|k| k == "output"));
    assert!(kinds.iter().any(|k| k == "system"));
}

#[tokio::test]
async fn unknown_session_lookups() {
    let mut client = TestClient::start(warden_types::Config::default());

    let response = client
        .call(1, "get_session", json!({"SESSION_ID": "ghost"}))
        .await;
    assert_eq!(structured(&response)["found"], false);

    let response = client
        .call(2, "cancel_session", json!({"SESSION_ID": "ghost"}))
        .await;
    assert_error(&response, -32009, "SessionNotFound");

    let response = client
        .call(3, "tail_session", json!({"SESSION_ID": "ghost"}))
        .await;
    assert_eq!(structured(&response)["found"], false);
}

#[tokio::test]
async fn stats_reflects_request_outcomes() {
    let dir = tmpdir();
    let exe = fake_codex(dir.path(), HAPPY_BODY);
    let mut client = TestClient::start(config_with_executable(&exe));

    let workdir = tmpdir();
    client
        .call(
            1,
            "codex",
            json!({"PROMPT": "hi", "cd": workdir.path().to_str().unwrap()}),
        )
        .await;
    client
        .call(2, "codex", json!({"PROMPT": "hi", "cd": "/no/such/dir"}))
        .await;

    let response = client.call(3, "stats", json!({})).await;
    let out = structured(&response);
    let metrics = &out["metrics"];
    assert_eq!(metrics["tool_calls"]["codex"], 2);
    assert_eq!(metrics["failed_requests"], 1);
    assert_eq!(metrics["success_requests"], 1);
    assert_eq!(metrics["error_counts"]["WorkdirNotFound"], 1);
    assert!(out["uptime"].is_string());
}

#[tokio::test]
async fn empty_prompt_and_missing_cd_fail_fast() {
    let mut client = TestClient::start(warden_types::Config::default());

    let response = client.call(1, "codex", json!({"cd": "/tmp"})).await;
    assert_error(&response, -32602, "InvalidParams");
    assert!(response["error"]["message"]
        .as_str()
        .unwrap()
        .contains("PROMPT"));

    let response = client.call(2, "codex", json!({"PROMPT": "hi"})).await;
    assert_error(&response, -32602, "InvalidParams");
    assert!(response["error"]["message"].as_str().unwrap().contains("cd"));
}
