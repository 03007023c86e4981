use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::{Error, Result};

/// Translate a symbolic name ("TERM", "SIGTERM", "term") to a host signal.
pub fn parse_signal(name: &str) -> Result<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    let sig = match bare {
        "HUP" => Signal::SIGHUP,
        "INT" => Signal::SIGINT,
        "QUIT" => Signal::SIGQUIT,
        "ILL" => Signal::SIGILL,
        "ABRT" => Signal::SIGABRT,
        "FPE" => Signal::SIGFPE,
        "KILL" => Signal::SIGKILL,
        "USR1" => Signal::SIGUSR1,
        "SEGV" => Signal::SIGSEGV,
        "USR2" => Signal::SIGUSR2,
        "PIPE" => Signal::SIGPIPE,
        "ALRM" => Signal::SIGALRM,
        "TERM" => Signal::SIGTERM,
        "CHLD" => Signal::SIGCHLD,
        "CONT" => Signal::SIGCONT,
        "STOP" => Signal::SIGSTOP,
        "TSTP" => Signal::SIGTSTP,
        _ => return Err(Error::UnknownSignal(name.to_string())),
    };
    Ok(sig)
}

/// Send a signal to the process group led by `pid`.
pub fn kill_group(pid: u32, sig: Signal) -> Result<()> {
    signal::killpg(Pid::from_raw(pid as i32), sig)?;
    Ok(())
}

/// Signal-0 liveness probe.
pub fn is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}
