//! Process-tree termination.
//!
//! On POSIX the child is placed in its own process group at spawn, so a
//! single signal to the negative pgid reaches every descendant. Windows has
//! no equivalent primitive here; the direct child is killed and grandchildren
//! are on their own. That asymmetry is deliberate.

use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Configure `cmd` so the spawned child leads its own process group.
pub(crate) fn isolate_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
}

/// Kill the child's whole process tree, tolerating races with exit.
pub(crate) async fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::errno::Errno;
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        // The child is its own process-group leader, so -pid addresses the
        // entire group.
        match signal::kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL) {
            Ok(()) => debug!(pid, "killed codex process group"),
            Err(Errno::ESRCH) => debug!(pid, "codex process group already gone"),
            Err(err) => warn!(pid, %err, "failed to signal codex process group"),
        }
    }

    // Direct kill as a fallback (and the only mechanism on Windows).
    if let Err(err) = child.start_kill() {
        debug!(%err, "direct kill failed (process likely already exited)");
    }
    let _ = child.wait().await;
}
