//! Bounded git invocations.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Spawn(std::io::Error),
    #[error("git exited with {status}: {detail}")]
    Failed { status: i32, detail: String },
    #[error("{0}")]
    Io(std::io::Error),
}

/// Repository root for `cd`, or `None` when `cd` is not inside a work tree.
pub async fn git_root(cd: &Path, timeout: Duration) -> Result<Option<String>, GitError> {
    match run_git(cd, timeout, &["rev-parse", "--show-toplevel"]).await {
        Ok(out) => {
            let root = out.trim();
            if root.is_empty() {
                Ok(None)
            } else {
                Ok(Some(root.to_string()))
            }
        }
        Err(err) if is_not_git_repo(&err) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Run `git -C <cd> <args...>` under `timeout`, returning combined output.
pub(crate) async fn run_git(
    cd: &Path,
    timeout: Duration,
    args: &[&str],
) -> Result<String, GitError> {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(cd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let fut = async {
        let output = cmd.output().await.map_err(GitError::Spawn)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let mut detail = stderr.trim().to_string();
            if detail.is_empty() {
                detail = stdout.trim().to_string();
            }
            return Err(GitError::Failed {
                status: output.status.code().unwrap_or(-1),
                detail,
            });
        }
        Ok(stdout.trim_end_matches('\n').to_string())
    };

    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| GitError::Timeout(timeout))?
}

/// Run git and stream stdout up to `max_bytes`. Once the ceiling is hit the
/// process keeps draining (so it is not back-pressured) but nothing more is
/// appended, and the result is flagged truncated.
pub(crate) async fn run_git_truncated(
    cd: &Path,
    timeout: Duration,
    max_bytes: usize,
    args: &[&str],
) -> Result<(String, bool), GitError> {
    let mut cmd = Command::new("git");
    cmd.arg("-C")
        .arg(cd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let fut = async {
        let mut child = cmd.spawn().map_err(GitError::Spawn)?;
        let Some(mut stdout) = child.stdout.take() else {
            return Err(GitError::Io(std::io::Error::other("stdout not captured")));
        };
        let mut stderr = child.stderr.take();

        let mut collected: Vec<u8> = Vec::with_capacity(max_bytes.min(8 * 1024));
        let mut truncated = false;
        let mut buf = [0u8; 4096];
        loop {
            let n = stdout.read(&mut buf).await.map_err(GitError::Io)?;
            if n == 0 {
                break;
            }
            let remaining = max_bytes.saturating_sub(collected.len());
            if remaining >= n {
                collected.extend_from_slice(&buf[..n]);
            } else {
                collected.extend_from_slice(&buf[..remaining]);
                truncated = true;
            }
        }

        // stderr is small for diff; fold it into error context only.
        let mut err_buf = String::new();
        if let Some(stderr) = stderr.as_mut() {
            let _ = stderr.read_to_string(&mut err_buf).await;
        }

        let status = child.wait().await.map_err(GitError::Io)?;
        if !status.success() {
            let mut detail = err_buf.trim().to_string();
            if detail.is_empty() {
                detail = String::from_utf8_lossy(&collected).trim().to_string();
            }
            return Err(GitError::Failed {
                status: status.code().unwrap_or(-1),
                detail,
            });
        }

        let out = String::from_utf8_lossy(&collected)
            .trim_end_matches('\n')
            .to_string();
        Ok((out, truncated))
    };

    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| GitError::Timeout(timeout))?
}

fn is_not_git_repo(err: &GitError) -> bool {
    match err {
        GitError::Failed { detail, .. } => detail.contains("not a git repository"),
        _ => false,
    }
}
