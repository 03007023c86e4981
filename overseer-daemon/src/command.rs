//! The per-Process command queue. One cooperative loop consumes a bounded
//! channel and serializes every start/stop against the run loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::process::{self, ProcessInner, State};
use overseer_core::Result;

pub(crate) enum ProcessCommand {
    Start {
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        immediate: bool,
        done: oneshot::Sender<()>,
    },
}

impl ProcessCommand {
    fn kind(&self) -> &'static str {
        match self {
            ProcessCommand::Start { .. } => "start",
            ProcessCommand::Stop { .. } => "stop",
        }
    }
}

pub(crate) fn spawn_command_loop(inner: Arc<ProcessInner>, rx: mpsc::Receiver<ProcessCommand>) {
    crate::panic_trace::install_hook();
    tokio::spawn(command_loop(inner, rx));
}

async fn command_loop(inner: Arc<ProcessInner>, mut rx: mpsc::Receiver<ProcessCommand>) {
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(cmd) => on_command(&inner, cmd).await,
                None => return,
            },
            _ = inner.shutdown.stopped() => return,
        }
    }
}

/// A panicking handler must not take the loop down with it.
async fn on_command(inner: &Arc<ProcessInner>, cmd: ProcessCommand) {
    let kind = cmd.kind();
    let handled = futures::FutureExt::catch_unwind(AssertUnwindSafe(dispatch(inner, cmd))).await;
    if let Err(panic) = handled {
        error!(
            "process command {kind} fail: {}\n{}",
            panic_message(&panic),
            crate::panic_trace::take_backtrace()
        );
    }
}

async fn dispatch(inner: &Arc<ProcessInner>, cmd: ProcessCommand) {
    match cmd {
        ProcessCommand::Start { reply } => on_start(inner, reply).await,
        ProcessCommand::Stop { immediate, done } => on_stop(inner, immediate, done).await,
    }
}

async fn on_start(inner: &Arc<ProcessInner>, reply: oneshot::Sender<Result<()>>) {
    let state = *inner.state.read();
    if state == State::Running || state == State::Starting {
        info!("process {} is already running", inner.config.read().name);
        let _ = reply.send(Ok(()));
        return;
    }
    let (started_tx, started_rx) = oneshot::channel();
    tokio::spawn(process::run_process(inner.clone(), started_tx));
    let result = started_rx
        .await
        .unwrap_or(Err(overseer_core::Error::AbandonStart));
    let _ = reply.send(result);
}

async fn on_stop(inner: &Arc<ProcessInner>, immediate: bool, done: oneshot::Sender<()>) {
    let name = inner.config.read().name.clone();
    let state = *inner.state.read();
    if state == State::WaitSchedule {
        info!("process {name} is not started");
        let _ = done.send(());
        return;
    }
    if state == State::Stopped {
        info!("process {name} is already stopped");
        let _ = done.send(());
        return;
    }
    let flag = inner.stop_flag.read().clone();
    flag.stop();
    process::stop_process(inner, immediate).await;
    // the run loop's release is the last in-flight user
    flag.wait_drained().await;
    let _ = done.send(());
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
