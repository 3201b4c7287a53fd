//! Tool definitions published through `tools/list`.
//!
//! Schemas are written out explicitly so every property carries a `type`;
//! some providers validate function declarations strictly and reject
//! schemas that rely on defaults.

use serde_json::{json, Value};

const CODEX_DESCRIPTION: &str = "\
Executes a non-interactive Codex session via CLI to perform AI-assisted coding tasks in a secure workspace.
This tool wraps the 'codex exec' command, enabling model-driven code generation, debugging, or automation based on natural language prompts.
It supports resuming ongoing sessions for continuity and enforces sandbox policies to prevent unsafe operations.

Key Features:
- Prompt-Driven Execution: Send task instructions to Codex for step-by-step code handling.
- Workspace Isolation: Operate within a specified directory, with optional Git repo skipping.
- Security Controls: Three sandbox levels (read-only, workspace-write, danger-full-access) balance functionality and safety.
- Session Persistence: Resume prior conversations via SESSION_ID for iterative tasks.

Edge Cases & Best Practices:
- Ensure 'cd' exists and is accessible; the call fails fast on invalid paths.
- Defaults to \"read-only\" sandbox. Valid sandbox values: read-only, workspace-write, danger-full-access.
- Disables \"yolo\" (auto-confirmation) by default; enable write/yolo explicitly if your workflow requires it.
- If needed, set 'return_all_messages' to True to parse \"all_messages\" for detailed tracing (e.g., reasoning, tool calls, etc.).";

pub fn codex_input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "PROMPT": {
                "type": "string",
                "description": "Instruction for the task to send to codex.",
            },
            "cd": {
                "type": "string",
                "description": "Set the workspace root for codex before executing the task.",
            },
            "sandbox": {
                "type": "string",
                "description": "Sandbox policy for model-generated commands. Valid values: read-only (default), workspace-write, danger-full-access.",
                "enum": ["read-only", "workspace-write", "danger-full-access"],
            },
            "SESSION_ID": {
                "type": "string",
                "description": "Resume the specified session of the codex. Defaults to None, start a new session.",
            },
            "skip_git_repo_check": {
                "type": "boolean",
                "description": "Allow codex running outside a Git repository (useful for one-off directories).",
            },
            "return_all_messages": {
                "type": "boolean",
                "description": "Return all messages (e.g. reasoning, tool calls, etc.) from the codex session. Set to False by default, only the agent's final reply message is returned.",
            },
            "image": {
                "type": "array",
                "description": "Attach one or more image files to the initial prompt.",
                "items": {"type": "string"},
            },
            "model": {
                "type": "string",
                "description": "The model to use for the codex session. This parameter is restricted by server allowlist (disabled by default).",
            },
            "yolo": {
                "type": "boolean",
                "description": "Run every command without approvals or sandboxing. Defaults to false to avoid unsafe execution.",
            },
            "profile": {
                "type": "string",
                "description": "Configuration profile name to load from '~/.codex/config.toml'. This parameter is restricted by server allowlist (disabled by default).",
            },
            "timeout_seconds": {
                "type": "number",
                "description": "Total timeout (seconds) for the codex invocation. Defaults to the configured default; capped at the configured maximum.",
            },
            "no_output_seconds": {
                "type": "number",
                "description": "No-output watchdog (seconds). Kill the run if no output for this duration. Defaults to 0 (disabled) if not set.",
            },
            "return_diff": {
                "type": "boolean",
                "description": "Capture a change receipt (git status and size-bounded diff) after the run.",
            },
        },
        "required": ["PROMPT", "cd"],
    })
}

pub fn codex_output_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "success": {
                "type": "boolean",
                "description": "Whether the Codex invocation succeeded.",
            },
            "SESSION_ID": {
                "type": "string",
                "description": "Codex session/thread identifier (thread_id).",
            },
            "agent_messages": {
                "type": "string",
                "description": "The agent's final reply text (may contain multiple lines).",
            },
            "all_messages": {
                "type": "array",
                "description": "Raw Codex CLI JSONL lines. Present only when return_all_messages=true.",
                "items": {"type": "object"},
            },
            "execution_time_ms": {
                "type": "number",
                "description": "Execution time for the Codex CLI invocation, in milliseconds.",
            },
            "tool_call_count": {
                "type": "number",
                "description": "Best-effort count of tool calls observed in Codex JSONL output.",
            },
            "change_receipt": {
                "type": "object",
                "description": "Repository status/diff snapshot. Present only when return_diff=true.",
            },
        },
        "required": ["success", "SESSION_ID", "agent_messages"],
    })
}

fn empty_input_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

fn session_id_input_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "SESSION_ID": {"type": "string", "description": description},
        },
        "required": ["SESSION_ID"],
    })
}

fn tail_session_input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "SESSION_ID": {"type": "string", "description": "Session identifier to tail."},
            "cursor": {"type": "number", "description": "Return entries with seq > cursor. Start with 0."},
            "limit": {"type": "number", "description": "Maximum number of entries to return (default 50, max 200)."},
        },
        "required": ["SESSION_ID"],
    })
}

/// Everything `tools/list` publishes.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "codex",
            "description": CODEX_DESCRIPTION,
            "inputSchema": codex_input_schema(),
            "outputSchema": codex_output_schema(),
        }),
        json!({
            "name": "stats",
            "title": "Server Stats",
            "description": "Returns server uptime and aggregate request metrics.",
            "inputSchema": empty_input_schema(),
            "annotations": {"readOnlyHint": true},
        }),
        json!({
            "name": "list_sessions",
            "title": "List Sessions",
            "description": "Lists running and recent Codex sessions tracked by the server.",
            "inputSchema": empty_input_schema(),
            "annotations": {"readOnlyHint": true},
        }),
        json!({
            "name": "get_session",
            "title": "Get Session",
            "description": "Returns session metadata and state for the given SESSION_ID.",
            "inputSchema": session_id_input_schema("Session identifier to look up."),
            "annotations": {"readOnlyHint": true},
        }),
        json!({
            "name": "cancel_session",
            "title": "Cancel Session",
            "description": "Cancels a running session identified by SESSION_ID.",
            "inputSchema": session_id_input_schema("Running session identifier to cancel."),
            "annotations": {
                "readOnlyHint": false,
                "destructiveHint": true,
                "idempotentHint": false,
                "openWorldHint": false,
            },
        }),
        json!({
            "name": "tail_session",
            "title": "Tail Session",
            "description": "Returns diagnostic entries for a session after the given cursor.",
            "inputSchema": tail_session_input_schema(),
            "annotations": {"readOnlyHint": true},
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_all_six_tools() {
        let tools = tool_definitions();
        let names: Vec<&str> = tools
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "codex",
                "stats",
                "list_sessions",
                "get_session",
                "cancel_session",
                "tail_session"
            ]
        );
    }

    #[test]
    fn every_property_has_an_explicit_type() {
        for tool in tool_definitions() {
            let props = tool["inputSchema"]["properties"]
                .as_object()
                .expect("object schema");
            for (name, prop) in props {
                assert!(
                    prop.get("type").is_some(),
                    "property {name} of {} lacks a type",
                    tool["name"]
                );
            }
        }
    }

    #[test]
    fn codex_requires_prompt_and_cd() {
        let schema = codex_input_schema();
        assert_eq!(schema["required"], json!(["PROMPT", "cd"]));
    }

    #[test]
    fn cancel_session_is_destructive_and_closed_world() {
        let tools = tool_definitions();
        let cancel = tools
            .iter()
            .find(|t| t["name"] == "cancel_session")
            .unwrap();
        assert_eq!(cancel["annotations"]["destructiveHint"], true);
        assert_eq!(cancel["annotations"]["openWorldHint"], false);
        assert_eq!(cancel["annotations"]["readOnlyHint"], false);
    }

    #[test]
    fn readers_are_marked_read_only() {
        for name in ["stats", "list_sessions", "get_session", "tail_session"] {
            let tools = tool_definitions();
            let tool = tools.iter().find(|t| t["name"] == name).unwrap();
            assert_eq!(
                tool["annotations"]["readOnlyHint"], true,
                "{name} must be read-only"
            );
        }
    }
}
