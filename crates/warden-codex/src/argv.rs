//! Argument construction for the codex CLI.
//!
//! The argv is a pure function of the run options, so the exact command
//! line is reproducible from a session record.

use crate::runner::RunOptions;

/// Build the argument vector (excluding the executable itself).
pub fn build_argv(opts: &RunOptions) -> Vec<String> {
    let mut args = vec![
        "exec".to_string(),
        "--sandbox".to_string(),
        opts.sandbox.as_str().to_string(),
        "--cd".to_string(),
        opts.working_dir.display().to_string(),
        "--json".to_string(),
    ];

    if !opts.image_paths.is_empty() {
        args.push("--image".to_string());
        args.push(opts.image_paths.join(","));
    }
    if !opts.model.is_empty() {
        args.push("--model".to_string());
        args.push(opts.model.clone());
    }
    if !opts.profile.is_empty() {
        args.push("--profile".to_string());
        args.push(opts.profile.clone());
    }
    if opts.yolo {
        args.push("--yolo".to_string());
    }
    if opts.skip_git_repo_check {
        args.push("--skip-git-repo-check".to_string());
    }

    if !opts.session_id.is_empty() {
        args.push("resume".to_string());
        args.push(opts.session_id.clone());
    }

    let prompt = if cfg!(windows) {
        escape_prompt(&opts.prompt)
    } else {
        opts.prompt.clone()
    };
    args.push("--".to_string());
    args.push(prompt);

    args
}

/// Backslash-escape characters that break Windows shell quoting.
fn escape_prompt(prompt: &str) -> String {
    let mut out = String::with_capacity(prompt.len());
    for c in prompt.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use warden_types::SandboxMode;

    fn base_opts() -> RunOptions {
        RunOptions {
            prompt: "fix the bug".into(),
            working_dir: PathBuf::from("/work"),
            sandbox: SandboxMode::ReadOnly,
            ..RunOptions::default()
        }
    }

    #[test]
    fn minimal_argv_shape() {
        let args = build_argv(&base_opts());
        assert_eq!(
            args,
            vec![
                "exec",
                "--sandbox",
                "read-only",
                "--cd",
                "/work",
                "--json",
                "--skip-git-repo-check",
                "--",
                "fix the bug"
            ]
        );
    }

    #[test]
    fn argv_is_stable_across_invocations() {
        let opts = base_opts();
        assert_eq!(build_argv(&opts), build_argv(&opts));
    }

    #[test]
    fn optional_flags_in_order() {
        let mut opts = base_opts();
        opts.sandbox = SandboxMode::WorkspaceWrite;
        opts.image_paths = vec!["a.png".into(), "b.png".into()];
        opts.model = "o4-mini".into();
        opts.profile = "dev".into();
        opts.yolo = true;
        opts.session_id = "t-99".into();

        let args = build_argv(&opts);
        assert_eq!(
            args,
            vec![
                "exec",
                "--sandbox",
                "workspace-write",
                "--cd",
                "/work",
                "--json",
                "--image",
                "a.png,b.png",
                "--model",
                "o4-mini",
                "--profile",
                "dev",
                "--yolo",
                "--skip-git-repo-check",
                "resume",
                "t-99",
                "--",
                "fix the bug"
            ]
        );
    }

    #[test]
    fn skip_git_repo_check_can_be_disabled() {
        let mut opts = base_opts();
        opts.skip_git_repo_check = false;
        let args = build_argv(&opts);
        assert!(!args.contains(&"--skip-git-repo-check".to_string()));
    }

    #[test]
    fn prompt_always_follows_separator() {
        let mut opts = base_opts();
        opts.prompt = "--model gpt-5".into();
        let args = build_argv(&opts);
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(args[sep + 1], "--model gpt-5");
        assert_eq!(sep + 2, args.len());
    }

    #[test]
    fn escape_prompt_covers_control_characters() {
        assert_eq!(
            escape_prompt("a\\b\"c'd\ne\rf\tg\u{0008}h\u{000C}i"),
            "a\\\\b\\\"c\\'d\\ne\\rf\\tg\\bh\\fi"
        );
    }
}
