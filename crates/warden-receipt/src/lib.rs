//! Change receipts: a best-effort, size-bounded snapshot of what an agent
//! run left behind in the repository.
//!
//! Collection shells out to `git` on PATH. Every step runs under a short
//! budget and every failure is captured into `receipt_error` instead of
//! failing the caller; a missing repository or missing `git` simply yields
//! an unavailable receipt.

mod git;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use git::{git_root, GitError};
use git::{run_git, run_git_truncated};

/// One entry from `git status --porcelain=v1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub index_status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub worktree_status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeReceipt {
    pub receipt_available: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_root: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub git_status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff_stat: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_files: Vec<FileChange>,

    /// Raw diff text, only when requested, always size-limited.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diff: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub diff_truncated: bool,

    /// Why the receipt is partial or unavailable. Never fails the call.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub receipt_error: String,
}

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub return_diff: bool,
    pub max_diff_bytes: usize,
    /// Budget applied to each git invocation.
    pub timeout: Duration,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            return_diff: false,
            max_diff_bytes: 64 * 1024,
            timeout: Duration::from_secs(3),
        }
    }
}

/// Collect a change receipt for the repository containing `cd`.
pub async fn collect(cd: &Path, opts: CollectOptions) -> ChangeReceipt {
    let mut receipt = ChangeReceipt::default();

    if which::which("git").is_err() {
        receipt.receipt_error = "git not found".to_string();
        return receipt;
    }

    let root = match git_root(cd, opts.timeout).await {
        Ok(Some(root)) => root,
        Ok(None) => return receipt,
        Err(err) => {
            receipt.receipt_error = err.to_string();
            return receipt;
        }
    };

    receipt.receipt_available = true;
    receipt.git_root = root;

    let status = match run_git(cd, opts.timeout, &["status", "--porcelain=v1"]).await {
        Ok(out) => out,
        Err(err) => {
            receipt.receipt_error = format!("git status failed: {err}");
            return receipt;
        }
    };
    receipt.changed_files = parse_porcelain_v1(&status);
    receipt.git_status = status;

    match run_git(cd, opts.timeout, &["diff", "--stat"]).await {
        Ok(out) => receipt.diff_stat = out,
        Err(err) => {
            receipt.receipt_error = format!("git diff --stat failed: {err}");
            return receipt;
        }
    }

    if opts.return_diff {
        match run_git_truncated(cd, opts.timeout, opts.max_diff_bytes, &["diff"]).await {
            Ok((diff, truncated)) => {
                receipt.diff = diff;
                receipt.diff_truncated = truncated;
            }
            Err(err) => {
                receipt.receipt_error = format!("git diff failed: {err}");
                return receipt;
            }
        }
    }

    debug!(
        git_root = %receipt.git_root,
        changed = receipt.changed_files.len(),
        truncated = receipt.diff_truncated,
        "change receipt collected"
    );
    receipt
}

fn parse_porcelain_v1(status: &str) -> Vec<FileChange> {
    let mut out = Vec::new();
    for line in status.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("?? ") {
            let path = rest.trim();
            if path.is_empty() {
                continue;
            }
            out.push(FileChange {
                path: path.to_string(),
                index_status: "?".to_string(),
                worktree_status: "?".to_string(),
            });
            continue;
        }
        if line.len() < 3 {
            continue;
        }
        let index_status = line[0..1].trim();
        let worktree_status = line[1..2].trim();
        let path = line[3..].trim();
        if path.is_empty() {
            continue;
        }
        out.push(FileChange {
            path: path.to_string(),
            index_status: index_status.to_string(),
            worktree_status: worktree_status.to_string(),
        });
    }
    out
}
