use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::debug;

/// Best-effort sweep of already-zombied children. Runs once at startup,
/// before the supervisor spawns anything of its own, so it cannot steal
/// exits from the run loops.
pub fn reap_stale_children() {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => return,
            Ok(status) => debug!("reaped stale child: {status:?}"),
        }
    }
}
