//! Workspace keys and per-workspace mutual exclusion.
//!
//! The lock key is the canonical repository root: absolute, lexically
//! cleaned, symlinks resolved, and upgraded to the git toplevel when a
//! short probe finds one. Two calls in sibling subdirectories of the same
//! repository therefore serialize on the same slot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use warden_receipt::git_root;
use warden_types::config::clean_path;
use warden_types::{ErrorCode, ToolError, WorkdirLockMode};

const GIT_ROOT_PROBE_BUDGET: Duration = Duration::from_secs(2);

/// Compute the lock key for a working directory.
pub async fn workdir_key(cd: &Path) -> String {
    let normalized = normalize_workdir(cd);

    // Prefer the repository root so concurrent runs in the same repo are
    // mutually excluded even when started from different subdirectories.
    if let Ok(Some(root)) = git_root(&normalized, GIT_ROOT_PROBE_BUDGET).await {
        let root = normalize_workdir(Path::new(&root));
        if !root.as_os_str().is_empty() {
            return root.display().to_string();
        }
    }
    normalized.display().to_string()
}

/// Absolute, cleaned, symlink-resolved form of `path`.
///
/// Falls back to a lexical clean of the absolute path when the directory
/// cannot be canonicalized (e.g. it no longer exists).
fn normalize_workdir(path: &Path) -> PathBuf {
    if let Ok(real) = std::fs::canonicalize(path) {
        return real;
    }
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    clean_path(&abs)
}

/// Held while a call owns its workspace slot; releasing is dropping.
pub struct WorkdirGuard {
    key: String,
    _permit: OwnedSemaphorePermit,
}

impl WorkdirGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// One single-slot semaphore per canonical workspace key. Entries are never
/// removed; the map is bounded by the number of distinct workspaces seen.
#[derive(Default)]
pub struct WorkdirLocks {
    slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl WorkdirLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the slot for `key`.
    ///
    /// Returns `Ok(None)` when the slot is occupied (reject mode, or queue
    /// mode after `queue_timeout`). Caller cancellation while queued is an
    /// error so the dispatcher can classify it.
    pub async fn acquire(
        &self,
        key: &str,
        mode: WorkdirLockMode,
        queue_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<WorkdirGuard>, ToolError> {
        let slot = self.slot(key);

        let permit = match mode {
            WorkdirLockMode::Reject => match slot.try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => None,
            },
            WorkdirLockMode::Queue => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(ToolError::new(
                            ErrorCode::InternalError,
                            "request cancelled while waiting for workspace lock",
                        ));
                    }
                    acquired = tokio::time::timeout(queue_timeout, slot.acquire_owned()) => {
                        match acquired {
                            Ok(Ok(permit)) => Some(permit),
                            // The semaphore is never closed.
                            Ok(Err(_)) | Err(_) => None,
                        }
                    }
                }
            }
        };

        match permit {
            Some(permit) => {
                debug!(key, "workspace lock acquired");
                Ok(Some(WorkdirGuard {
                    key: key.to_string(),
                    _permit: permit,
                }))
            }
            None => Ok(None),
        }
    }

    fn slot(&self, key: &str) -> Arc<Semaphore> {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }
}
