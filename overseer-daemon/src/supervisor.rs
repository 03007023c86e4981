use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

use crate::admin::AdminServer;
use crate::evaluator::{ScriptEvaluator, ShellEvaluator};
use crate::process::{ExitCallback, Process, ProcessSnapshot, State};
use crate::reaper;
use overseer_core::purge::collect_purge_files;
use overseer_core::{ConfigProvider, Error, ProcessConfig, Result, StopFlag, SupervisorConfig};
use overseer_http::AdminAddr;

#[derive(Debug, Clone, Copy, Default)]
pub struct StopOption {
    pub clear_log: bool,
    pub stop_immediately: bool,
}

impl std::fmt::Display for StopOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "clear_log={} stop_immediately={}",
            self.clear_log, self.stop_immediately
        )
    }
}

/// The coordinator: owns the process table and sequences every batch
/// operation. Single-name operations take the read lock because each
/// Process serializes its own commands; table-structural operations take
/// the write lock.
pub struct Supervisord {
    provider: Arc<ConfigProvider>,
    admin: AdminServer,
    stop_chan: StopFlag,
    table: RwLock<HashMap<String, Arc<Process>>>,
    done: DashMap<String, ()>,
    exit_tx: mpsc::Sender<bool>,
    exit_rx: parking_lot::Mutex<Option<mpsc::Receiver<bool>>>,
    evaluator: Box<dyn ScriptEvaluator>,
}

impl Supervisord {
    pub fn new(provider: Arc<ConfigProvider>) -> Arc<Self> {
        Self::with_evaluator(provider, Box::new(ShellEvaluator))
    }

    pub fn with_evaluator(
        provider: Arc<ConfigProvider>,
        evaluator: Box<dyn ScriptEvaluator>,
    ) -> Arc<Self> {
        let (exit_tx, exit_rx) = mpsc::channel(1);
        Arc::new(Self {
            provider,
            admin: AdminServer::new(),
            stop_chan: StopFlag::new(),
            table: RwLock::new(HashMap::new()),
            done: DashMap::new(),
            exit_tx,
            exit_rx: parking_lot::Mutex::new(Some(exit_rx)),
            evaluator,
        })
    }

    pub fn config(&self) -> Arc<SupervisorConfig> {
        self.provider.get_config()
    }

    pub fn check_config_file(&self) -> Result<()> {
        self.provider.check_config_file()
    }

    /// Bring the fleet up, start the admin server and block until a stop.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let cnf = self.config();
        if cnf.reap_zombie {
            reaper::reap_stale_children();
        }
        self.export_dial_addr(&cnf);
        self.start_all(true).await?;
        self.admin
            .start(AdminAddr::from_config(&cnf), self.clone())
            .await?;
        self.spawn_signal_watcher();
        self.spawn_exit_watcher();
        self.stop_chan.stopped().await;
        Ok(())
    }

    pub async fn start_process(&self, name: &str) -> Result<()> {
        let table = self.table.read().await;
        let p = table
            .get(name)
            .ok_or_else(|| Error::ProcessNotFound(name.to_string()))?;
        let state = p.state();
        if state == State::Running || state == State::Starting {
            return Err(Error::ProcessRunning(name.to_string()));
        }
        p.start().await?;
        self.done.remove(name);
        Ok(())
    }

    pub async fn stop_process(&self, name: &str) -> Result<()> {
        let table = self.table.read().await;
        let p = table
            .get(name)
            .ok_or_else(|| Error::ProcessNotFound(name.to_string()))?;
        p.stop(false).await
    }

    pub async fn restart_process(&self, name: &str) -> Result<()> {
        let table = self.table.read().await;
        let p = table
            .get(name)
            .ok_or_else(|| Error::ProcessNotFound(name.to_string()))?;
        p.stop(false).await?;
        p.start().await?;
        self.done.remove(name);
        Ok(())
    }

    pub async fn omit_process_exit_code(&self, name: &str) -> Result<()> {
        let table = self.table.read().await;
        let p = table
            .get(name)
            .ok_or_else(|| Error::ProcessNotFound(name.to_string()))?;
        p.omit_exit_code();
        info!("omit exit code of {name}");
        Ok(())
    }

    pub async fn omit_all_process_exit_code(&self) -> Result<()> {
        let table = self.table.read().await;
        for p in table.values() {
            p.omit_exit_code();
        }
        Ok(())
    }

    pub async fn start_all(self: &Arc<Self>, include_finished: bool) -> Result<()> {
        let mut table = self.table.write().await;
        self.start_all_locked(&mut table, include_finished).await
    }

    pub async fn stop_all(&self) -> Result<()> {
        let mut table = self.table.write().await;
        self.stop_all_locked(&mut table, false).await;
        Ok(())
    }

    pub async fn restart_all(self: &Arc<Self>) -> Result<()> {
        let mut table = self.table.write().await;
        self.stop_all_locked(&mut table, false).await;
        self.start_all_locked(&mut table, true).await
    }

    /// Stop everything, re-read the config file, re-point the admin server
    /// if its address changed, and start again with the prior done marks
    /// restored.
    pub async fn reload(self: &Arc<Self>) -> Result<()> {
        let mut table = self.table.write().await;
        let done_snapshot: Vec<String> = self.done.iter().map(|e| e.key().clone()).collect();
        self.stop_all_locked(&mut table, false).await;

        let cnf = self.provider.reload()?;
        self.admin
            .reload(AdminAddr::from_config(&cnf), self.clone())
            .await;
        self.export_dial_addr(&cnf);

        self.done.clear();
        for name in done_snapshot {
            self.done.insert(name, ());
        }
        self.start_all_locked(&mut table, false).await
    }

    /// Replace any prior process with this name, persist the config, and
    /// start the new one.
    pub async fn add_proc(self: &Arc<Self>, mut config: ProcessConfig) -> Result<()> {
        if config.name.is_empty() {
            return Err(Error::Config("bad proc".to_string()));
        }
        let mut table = self.table.write().await;
        if let Some(prior) = table.get(&config.name) {
            prior.shutdown(false).await;
        }
        config.fill_defaults();

        let mut gconf = (*self.config()).clone();
        gconf.add_process_config(config.clone());
        self.provider.update(gconf)?;

        let name = config.name.clone();
        let p = Arc::new(Process::new(config, self.exit_callback(&name)));
        table.insert(name, p.clone());
        p.start().await
    }

    /// Full supervisor stop: fleet, admin server, optional purge, then the
    /// coordinator's own stop edge.
    pub async fn stop(self: &Arc<Self>, option: StopOption) {
        let mut table = self.table.write().await;
        info!("terminating all process and supervisord, option {option}");
        self.stop_all_locked(&mut table, option.stop_immediately)
            .await;
        info!("all process terminated");
        self.admin.stop().await;
        if option.clear_log {
            self.clear_logs().await;
        }
        self.provider.close();
        self.stop_chan.stop();
    }

    pub fn stop_chan(&self) -> &StopFlag {
        &self.stop_chan
    }

    pub async fn snapshots(&self) -> Vec<ProcessSnapshot> {
        let table = self.table.read().await;
        let mut list: Vec<&Arc<Process>> = table.values().collect();
        list.sort_by_key(|p| p.create_time());
        list.iter().map(|p| p.snapshot()).collect()
    }

    pub async fn is_all_done(&self) -> bool {
        let table = self.table.read().await;
        table.keys().all(|name| self.done.contains_key(name))
    }

    pub fn is_done(&self, name: &str) -> bool {
        self.done.contains_key(name)
    }

    pub async fn run_admin_command(
        &self,
        source: &[u8],
        capture_stdout: bool,
    ) -> Result<Vec<u8>> {
        self.evaluator
            .evaluate(&self.config(), source, capture_stdout)
            .await
    }

    async fn start_all_locked(
        self: &Arc<Self>,
        table: &mut HashMap<String, Arc<Process>>,
        include_finished: bool,
    ) -> Result<()> {
        let already_done: Vec<String> = self.done.iter().map(|e| e.key().clone()).collect();
        self.done.clear();
        let cnf = self.config();
        for pc in &cnf.process {
            let name = pc.name.clone();
            if let Some(prior) = table.get(&name) {
                let state = prior.state();
                if state == State::Running || state == State::Starting {
                    return Err(Error::ProcessRunning(name));
                }
                prior.shutdown(false).await;
            }
            let mut config = pc.clone();
            config.fill_defaults();
            let p = Arc::new(Process::new(config, self.exit_callback(&name)));
            table.insert(name.clone(), p.clone());
            if already_done.contains(&name) && !include_finished {
                self.done.insert(name, ());
                continue;
            }
            if let Err(err) = p.start().await {
                warn!("start process {name} fail: {err}");
            }
        }
        Ok(())
    }

    async fn stop_all_locked(
        &self,
        table: &mut HashMap<String, Arc<Process>>,
        immediate: bool,
    ) {
        for p in table.values() {
            p.shutdown(immediate).await;
        }
        table.clear();
    }

    /// Mark the name done and publish the exit to the aggregator. Holds
    /// only a weak handle so a torn-down coordinator drops silently.
    fn exit_callback(self: &Arc<Self>, name: &str) -> ExitCallback {
        let weak = Arc::downgrade(self);
        let name = name.to_string();
        Arc::new(move |byuser| {
            let Some(s) = weak.upgrade() else { return };
            s.done.insert(name.clone(), ());
            if s.exit_tx.try_send(byuser).is_err() {
                let tx = s.exit_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(byuser).await;
                });
            }
        })
    }

    fn spawn_signal_watcher(self: &Arc<Self>) {
        use tokio::signal::unix::{SignalKind, signal};
        let s = self.clone();
        tokio::spawn(async move {
            let (Ok(mut sigint), Ok(mut sigterm)) = (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
            ) else {
                warn!("install signal handlers fail");
                return;
            };
            let received = tokio::select! {
                _ = sigint.recv() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            };
            info!("receive signal {received}");
            s.stop(StopOption::default()).await;
            std::process::exit(1);
        });
    }

    /// Drain the exit channel; when every name is done, no user asked for
    /// it, and the config says so, bring the whole supervisor down.
    pub fn spawn_exit_watcher(self: &Arc<Self>) {
        let Some(mut exit_rx) = self.exit_rx.lock().take() else {
            return;
        };
        let s = self.clone();
        tokio::spawn(async move {
            while let Some(byuser) = exit_rx.recv().await {
                let cnf = s.config();
                if cnf.exit_when_all_done && !byuser && s.is_all_done().await {
                    info!("all process exited, supervisord would exit too");
                    s.stop(StopOption::default()).await;
                    return;
                }
            }
        });
    }

    fn export_dial_addr(&self, cnf: &SupervisorConfig) {
        // Exported so children can dial their own supervisor. Racy by the
        // letter of the law; done before any child exists in practice.
        unsafe {
            std::env::set_var("SUPERVISOR_ADDRESS", cnf.admin_dial_addr());
        }
    }

    async fn clear_logs(&self) {
        let files = collect_purge_files(&self.config());
        if files.is_empty() {
            return;
        }
        let mut tasks = tokio::task::JoinSet::new();
        for file in files {
            // the purge set carries device sink globs; nothing on disk there
            if file.starts_with("/dev/") {
                continue;
            }
            tasks.spawn(async move {
                let status = tokio::process::Command::new("bash")
                    .arg("-c")
                    .arg(format!("rm -fr {file}"))
                    .status()
                    .await;
                match status {
                    Ok(st) if st.success() => info!("remove log {file} success"),
                    Ok(st) => warn!("remove log {file} fail: {st}"),
                    Err(err) => warn!("remove log {file} fail: {err}"),
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}
