use anyhow::bail;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cli::SpecArgs;
use crate::client;
use crate::flags::{FLAG_PREFIX, extract_supervisor_flags, parse_process_spec};
use overseer_core::ConfigProvider;
use overseer_daemon::Supervisord;
use overseer_logging::init_daemon_log;

/// `overseer start [-supvr.* overrides] [<name> <cmd> [args...]]`
///
/// Probes the admin endpoint first: a live answer means another master
/// owns this config, and this invocation must not touch anything.
pub async fn execute(config: Option<PathBuf>, args: SpecArgs) -> anyhow::Result<()> {
    if let Ok(probe) = client::admin_client(config.as_ref())
        && probe.get("/status").await.is_ok()
    {
        bail!("supervisord is already running");
    }

    let provider = Arc::new(match &config {
        Some(file) => ConfigProvider::from_file(file, true)?,
        None => ConfigProvider::new(true),
    });

    let mut cnf = (*provider.get_config()).clone();
    if cnf.is_blank() {
        let (flags, rest) = extract_supervisor_flags(&args.spec);
        for (key, value) in &flags {
            cnf.apply_flag(key, value)?;
        }
        if rest.len() >= 2 {
            cnf.add_process_config(parse_process_spec(rest)?);
        }
    }
    if cnf.admin_listen == 0 && cnf.admin_sock.is_empty() {
        // Persist the picked port so client invocations can dial it.
        cnf.ensure_admin_addr()?;
    }
    provider.update(cnf.clone())?;

    if cnf.daemonize {
        spawn_detached_daemon(config.as_ref())?;
        println!("supervisord started");
        return Ok(());
    }
    if cnf.hide_args && args.spec.iter().any(|a| a.starts_with(FLAG_PREFIX)) {
        // Replace ourselves with a trimmed command line; the config is on
        // disk, so the re-exec'd process needs none of the options.
        reexec_trimmed(&args.spec, config.as_ref())?;
    }
    run_daemon(provider).await
}

/// The hidden `daemon` subcommand: foreground daemon with the persisted
/// config, spawned by `start` when daemonizing.
pub async fn run_daemon_command(config: Option<PathBuf>) -> anyhow::Result<()> {
    let provider = Arc::new(match &config {
        Some(file) => ConfigProvider::from_file(file, true)?,
        None => ConfigProvider::new(true),
    });
    run_daemon(provider).await
}

async fn run_daemon(provider: Arc<ConfigProvider>) -> anyhow::Result<()> {
    let cnf = provider.get_config();
    init_daemon_log(&cnf.log)?;
    info!("supervisord starting, admin on {}", cnf.admin_listen_addr());
    let sup = Supervisord::new(provider.clone());
    let result = sup.run().await;
    provider.close();
    Ok(result?)
}

fn spawn_detached_daemon(config: Option<&PathBuf>) -> anyhow::Result<()> {
    use std::os::unix::process::CommandExt;
    use std::process::Stdio;

    let exe = std::env::current_exe()?;
    let mut cmd = std::process::Command::new(exe);
    if let Some(file) = config {
        cmd.arg("--config").arg(file);
    }
    cmd.arg("daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);
    cmd.spawn()?;
    Ok(())
}

fn reexec_trimmed(spec: &[String], config: Option<&PathBuf>) -> anyhow::Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()?;
    let mut cmd = std::process::Command::new(exe);
    if let Some(file) = config {
        cmd.arg("--config").arg(file);
    }
    cmd.arg("start");
    // keep only `<name> <cmd>` visible
    let (_, rest) = extract_supervisor_flags(spec);
    if rest.len() >= 2 {
        let (_, tail) = extract_supervisor_flags(&rest[1..]);
        if !tail.is_empty() {
            cmd.arg(&rest[0]).arg(&tail[0]);
        }
    }
    Err(cmd.exec().into())
}
