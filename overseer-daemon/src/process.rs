use nix::sys::signal::Signal;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::command::{self, ProcessCommand};
use overseer_core::config::{DEFAULT_STOP_WAIT_SECS, ProcessConfig};
use overseer_core::signal::{is_alive, kill_group, parse_signal};
use overseer_core::{Error, Result, StopFlag};
use overseer_logging::{SinkPolicy, SinkSet, parse_max_log_size, pump};

/// Called once per terminal run (a run not followed by a restart), with
/// `byuser` telling whether the stop flag was tripped.
pub type ExitCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum State {
    WaitSchedule,
    Starting,
    Running,
    Stopped,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::WaitSchedule => "WaitSchedule",
            State::Starting => "Starting",
            State::Running => "Running",
            State::Stopped => "Stopped",
        };
        write!(f, "{name}")
    }
}

/// Point-in-time view returned to the admin API. Taken without the
/// run-loop's cooperation, so it is best-effort by design.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub state: State,
    pub restart: i64,
    pub create_time: i64,
    pub start_time: i64,
    pub stop_time: i64,
    pub config: ProcessConfig,
    pub pid: String,
}

/// One supervised child: its state, its command queue, and the run loop
/// that keeps it alive. All state mutation happens on the command loop or
/// the run loop; the public API only enqueues and snapshots.
pub struct Process {
    inner: Arc<ProcessInner>,
}

pub(crate) struct ProcessInner {
    pub(crate) config: RwLock<ProcessConfig>,
    pub(crate) state: RwLock<State>,
    pub(crate) create_time: i64,
    pub(crate) start_time: RwLock<i64>,
    pub(crate) stop_time: RwLock<i64>,
    pub(crate) restart_count: RwLock<i64>,
    pub(crate) pid: RwLock<Option<u32>>,
    pub(crate) stop_flag: RwLock<StopFlag>,
    pub(crate) shutdown: StopFlag,
    pub(crate) exit_cb: ExitCallback,
    cmd_tx: mpsc::Sender<ProcessCommand>,
}

impl Process {
    /// The config is expected to have its defaults filled.
    pub fn new(config: ProcessConfig, exit_cb: ExitCallback) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(3);
        let inner = Arc::new(ProcessInner {
            config: RwLock::new(config),
            state: RwLock::new(State::WaitSchedule),
            create_time: now_unix(),
            start_time: RwLock::new(0),
            stop_time: RwLock::new(0),
            restart_count: RwLock::new(0),
            pid: RwLock::new(None),
            stop_flag: RwLock::new(StopFlag::new()),
            shutdown: StopFlag::new(),
            exit_cb,
            cmd_tx,
        });
        command::spawn_command_loop(inner.clone(), cmd_rx);
        Self { inner }
    }

    pub fn name(&self) -> String {
        self.inner.config.read().name.clone()
    }

    pub fn create_time(&self) -> i64 {
        self.inner.create_time
    }

    /// Enqueue a start request and wait for the first spawn result.
    pub async fn start(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ProcessCommand::Start { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| Error::AbandonStart)?
    }

    /// Enqueue a stop request and wait for the stop handshake, including
    /// the drain of any in-flight run.
    pub async fn stop(&self, immediate: bool) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(ProcessCommand::Stop {
            immediate,
            done: done_tx,
        })
        .await?;
        let _ = done_rx.await;
        Ok(())
    }

    /// Stop the child and terminate the command loop. The Process accepts
    /// no further commands afterwards.
    pub async fn shutdown(&self, immediate: bool) {
        let _ = self.stop(immediate).await;
        self.inner.shutdown.stop();
    }

    /// One-shot: classify the next exit as success regardless of code.
    pub fn omit_exit_code(&self) {
        self.inner.config.write().omit_exit_code = true;
    }

    pub fn state(&self) -> State {
        *self.inner.state.read()
    }

    pub fn restart_count(&self) -> i64 {
        *self.inner.restart_count.read()
    }

    pub fn snapshot(&self) -> ProcessSnapshot {
        let inner = &self.inner;
        let start_time = *inner.start_time.read();
        let mut stop_time = *inner.stop_time.read();
        if stop_time < start_time {
            stop_time = 0;
        }
        let pid = (*inner.pid.read())
            .map(|p| p.to_string())
            .unwrap_or_default();
        let mut config = inner.config.read().clone();
        // For display only: the child's effective environment, with the
        // configured entries winning over the inherited ones.
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(config.env.clone());
        config.env = env;
        ProcessSnapshot {
            state: *inner.state.read(),
            restart: *inner.restart_count.read(),
            create_time: inner.create_time,
            start_time,
            stop_time,
            config,
            pid,
        }
    }

    async fn send(&self, cmd: ProcessCommand) -> Result<()> {
        let name = self.name();
        self.inner
            .cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::Admin(format!("process {name} is shut down")))
    }
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The per-run-loop-entry restart backoff step function.
pub(crate) fn restart_interval(count: i64) -> Duration {
    match count {
        0 => Duration::from_millis(10),
        1..=3 => Duration::from_secs(1),
        4..=9 => Duration::from_secs(3),
        10..=49 => Duration::from_secs(30),
        _ => Duration::from_secs(60),
    }
}

/// One full run: spawn, babysit across restarts, and release. Exactly one
/// of these exists per Process at a time; the command loop spawns it and
/// the stop flag tears it down.
///
/// The child gets a parent-death signal on Linux; tokio worker threads
/// live for the runtime's lifetime, which keeps the signal bound to a
/// thread that outlives every run.
pub(crate) async fn run_process(
    inner: Arc<ProcessInner>,
    started: oneshot::Sender<Result<()>>,
) {
    info!("starting process {}", inner.config.read().name);
    let flag = prepare(&inner);
    let mut started = Some(started);
    let run = run_loop(&inner, &flag, &mut started);
    if let Err(panic) = futures::FutureExt::catch_unwind(std::panic::AssertUnwindSafe(run)).await
    {
        tracing::error!(
            "process run loop fail: {}\n{}",
            command::panic_message(&panic),
            crate::panic_trace::take_backtrace()
        );
    }
    release(&inner, &flag);
}

fn prepare(inner: &Arc<ProcessInner>) -> StopFlag {
    let flag = StopFlag::new();
    flag.add(1);
    *inner.stop_flag.write() = flag.clone();
    inner.config.write().omit_exit_code = false;
    *inner.state.write() = State::Starting;
    *inner.start_time.write() = now_unix();
    *inner.restart_count.write() = 0;
    *inner.stop_time.write() = 0;
    flag
}

fn release(inner: &Arc<ProcessInner>, flag: &StopFlag) {
    *inner.state.write() = State::Stopped;
    inner.config.write().omit_exit_code = false;
    *inner.stop_time.write() = now_unix();
    flag.done();
}

async fn run_loop(
    inner: &Arc<ProcessInner>,
    flag: &StopFlag,
    started: &mut Option<oneshot::Sender<Result<()>>>,
) {
    loop {
        let (mut child, sinks) = match spawn_child(inner, flag).await {
            Ok(spawned) => spawned,
            Err(err) => {
                if let Some(tx) = started.take() {
                    let _ = tx.send(Err(err));
                }
                return;
            }
        };
        update_running(inner, &child);
        if let Some(tx) = started.take() {
            let _ = tx.send(Ok(()));
        }
        let status = wait_child(inner, flag, &mut child).await;
        release_run_resources(inner, &sinks).await;
        if !check_result(inner, flag, status) {
            return;
        }
        let count = *inner.restart_count.read();
        let interval = restart_interval(count);
        *inner.state.write() = State::Starting;
        info!(
            "will restart after {:?}, total restart count {}",
            interval,
            count + 1
        );
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = flag.stopped() => return,
        }
        *inner.restart_count.write() = count + 1;
        *inner.start_time.write() = now_unix();
    }
}

async fn spawn_child(inner: &Arc<ProcessInner>, flag: &StopFlag) -> Result<(Child, SinkSet)> {
    let config = inner.config.read().clone();
    let mut cmd = match build_command(&config) {
        Ok(cmd) => cmd,
        Err(err) => {
            warn!("create command fail: {err}");
            return Err(err);
        }
    };
    let sinks = SinkSet::open(
        &config.stdout,
        &config.stderr,
        &SinkPolicy {
            keep_count: config.std_log_count,
            max_size: parse_max_log_size(&config.std_log_size),
        },
    )
    .await;

    const MAX_START_ATTEMPTS: u32 = 2;
    const RETRY_DELAY: Duration = Duration::from_secs(5);

    let mut last_err: Option<std::io::Error> = None;
    for attempt in 0..MAX_START_ATTEMPTS {
        if flag.is_stopped() {
            break;
        }
        match cmd.spawn() {
            Ok(mut child) => {
                if let Some(out) = child.stdout.take() {
                    tokio::spawn(pump(out, sinks.select(&config.stdout)));
                }
                if let Some(err) = child.stderr.take() {
                    tokio::spawn(pump(err, sinks.select(&config.stderr)));
                }
                return Ok((child, sinks));
            }
            Err(err) => {
                warn!("start command fail: {err}");
                last_err = Some(err);
                if attempt + 1 < MAX_START_ATTEMPTS {
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                        _ = flag.stopped() => {}
                    }
                }
            }
        }
    }
    sinks.close().await;
    if flag.is_stopped() {
        info!("abandon start because user request process to halt");
        return Err(Error::AbandonStart);
    }
    Err(Error::Spawn(
        last_err.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

fn build_command(config: &ProcessConfig) -> Result<Command> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !config.cwd.is_empty() {
        cmd.current_dir(&config.cwd);
    }
    // Inherited parent environment with the configured entries on top.
    cmd.envs(&config.env);
    // The child leads its own process group so the stop signal reaches
    // its whole tree.
    cmd.process_group(0);
    #[cfg(target_os = "linux")]
    unsafe {
        cmd.pre_exec(|| {
            nix::sys::prctl::set_pdeathsig(Signal::SIGKILL)
                .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))
        });
    }
    if !config.sys_user.is_empty() {
        let user = nix::unistd::User::from_name(&config.sys_user)?
            .ok_or_else(|| Error::UnknownUser(config.sys_user.clone()))?;
        let mut gid = user.gid.as_raw();
        if !config.sys_group.is_empty() {
            let group = nix::unistd::Group::from_name(&config.sys_group)?
                .ok_or_else(|| Error::UnknownGroup(config.sys_group.clone()))?;
            gid = group.gid.as_raw();
        }
        cmd.uid(user.uid.as_raw());
        cmd.gid(gid);
    }
    Ok(cmd)
}

fn update_running(inner: &Arc<ProcessInner>, child: &Child) {
    *inner.state.write() = State::Running;
    *inner.pid.write() = child.id();
    let config = inner.config.read();
    if !config.pid_file.is_empty()
        && let Some(pid) = child.id()
    {
        let path = std::path::Path::new(&config.pid_file);
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Err(err) = std::fs::write(path, pid.to_string()) {
            warn!("write pid file {} fail: {err}", config.pid_file);
        }
    }
    info!("process {} started", config.name);
}

async fn wait_child(
    inner: &Arc<ProcessInner>,
    flag: &StopFlag,
    child: &mut Child,
) -> Option<std::process::ExitStatus> {
    let name = inner.config.read().name.clone();
    match child.wait().await {
        Ok(status) => {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                if sig == Signal::SIGKILL as i32 && !flag.is_stopped() {
                    warn!("process {name} terminated by signal {sig}, maybe OOM");
                } else {
                    info!("process {name} terminated by signal {sig}");
                }
            }
            Some(status)
        }
        Err(err) => {
            warn!("wait process {name} fail: {err}");
            None
        }
    }
}

async fn release_run_resources(inner: &Arc<ProcessInner>, sinks: &SinkSet) {
    sinks.close().await;
    let pid_file = inner.config.read().pid_file.clone();
    if !pid_file.is_empty() {
        let _ = std::fs::remove_file(&pid_file);
    }
    *inner.pid.write() = None;
}

/// Classify the exit. Returns whether the run loop should restart.
fn check_result(
    inner: &Arc<ProcessInner>,
    flag: &StopFlag,
    status: Option<std::process::ExitStatus>,
) -> bool {
    let config = inner.config.read().clone();
    let code = status.and_then(|s| s.code()).unwrap_or(-1);
    let code_declared = if config.exit_codes.is_empty() {
        code == overseer_core::config::DEFAULT_SUCCESS_EXIT_CODE
    } else {
        config.exit_codes.contains(&code)
    };
    let matched = code_declared || config.omit_exit_code;
    let stopped = flag.is_stopped();
    let name = &config.name;
    match (matched, stopped) {
        (true, true) => {
            info!("process {name} exit with code {code}, user op.");
            (inner.exit_cb)(true);
            false
        }
        (true, false) => {
            info!("process {name} exit with code {code}, treat as success");
            (inner.exit_cb)(false);
            false
        }
        (false, true) => {
            info!("process {name} exit with code {code}");
            false
        }
        (false, false) => {
            warn!("process {name} UNEXPECTED exit with code {code}, will restart");
            true
        }
    }
}

/// The graceful-kill protocol: configured signal to the process group,
/// 100 ms liveness polls up to the configured wait, then KILL.
pub(crate) async fn stop_process(inner: &Arc<ProcessInner>, immediate: bool) {
    let config = inner.config.read().clone();
    let Some(pid) = *inner.pid.read() else {
        return;
    };
    let (sig, sig_name) = if immediate {
        (Signal::SIGKILL, "KILL".to_string())
    } else {
        match parse_signal(&config.stop_signal) {
            Ok(sig) => (sig, config.stop_signal.clone()),
            Err(err) => {
                warn!("parse signal fail: {err}");
                (Signal::SIGTERM, "TERM".to_string())
            }
        }
    };
    info!("send signal {sig_name} to process {}", config.name);
    if let Err(err) = kill_group(pid, sig) {
        warn!("signal process {} fail: {err}", config.name);
    }

    let wait_secs = if config.stop_wait_secs > 0 {
        config.stop_wait_secs
    } else {
        DEFAULT_STOP_WAIT_SECS
    };
    let interval = Duration::from_millis(100);
    for i in 0..(wait_secs * 10) {
        if !child_alive(inner) {
            info!(
                "process {} is halt after send {sig_name} {:?} later",
                config.name,
                interval * i as u32
            );
            return;
        }
        tokio::time::sleep(interval).await;
    }
    if child_alive(inner) {
        info!("send signal KILL to process {}", config.name);
        if let Some(pid) = *inner.pid.read() {
            let _ = kill_group(pid, Signal::SIGKILL);
        }
    }
}

fn child_alive(inner: &Arc<ProcessInner>) -> bool {
    match *inner.pid.read() {
        Some(pid) => is_alive(pid),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_interval_steps() {
        assert_eq!(restart_interval(0), Duration::from_millis(10));
        assert_eq!(restart_interval(1), Duration::from_secs(1));
        assert_eq!(restart_interval(3), Duration::from_secs(1));
        assert_eq!(restart_interval(4), Duration::from_secs(3));
        assert_eq!(restart_interval(9), Duration::from_secs(3));
        assert_eq!(restart_interval(10), Duration::from_secs(30));
        assert_eq!(restart_interval(49), Duration::from_secs(30));
        assert_eq!(restart_interval(50), Duration::from_secs(60));
        assert_eq!(restart_interval(1000), Duration::from_secs(60));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(State::WaitSchedule.to_string(), "WaitSchedule");
        assert_eq!(State::Stopped.to_string(), "Stopped");
    }
}
