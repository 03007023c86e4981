//! The supervisor's own log stream.
//!
//! Maps the top-level `log` setting onto a `tracing` subscriber writer:
//! stdout (default), discard, or a rotating file kept to one sibling.

use chrono::{Local, NaiveDate};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

use overseer_core::Result;

const MAX_DAEMON_LOG_SIZE: u64 = 1024 * 1024 * 1024;

/// Initialize the global subscriber for daemon mode.
pub fn init_daemon_log(log: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log {
        "" | "/dev/stdout" => builder.with_writer(std::io::stdout).init(),
        "/dev/stderr" => builder.with_writer(std::io::stderr).init(),
        "/dev/null" => builder.with_writer(std::io::sink).init(),
        path => {
            let writer = DaemonLogWriter::open(PathBuf::from(path))?;
            builder
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .init();
        }
    }
    Ok(())
}

/// Initialize the global subscriber for client commands: terse, stderr.
pub fn init_client_log() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

/// Size- and day-rotated file writer, one retained sibling.
#[derive(Clone)]
pub struct DaemonLogWriter {
    inner: Arc<Mutex<RollFile>>,
}

struct RollFile {
    path: PathBuf,
    file: File,
    written: u64,
    day: NaiveDate,
}

impl DaemonLogWriter {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        let file = open_append(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            inner: Arc::new(Mutex::new(RollFile {
                path,
                file,
                written,
                day: Local::now().date_naive(),
            })),
        })
    }
}

impl Write for DaemonLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut roll = self.inner.lock().expect("daemon log poisoned");
        let today = Local::now().date_naive();
        if roll.written + buf.len() as u64 >= MAX_DAEMON_LOG_SIZE || today != roll.day {
            roll.rotate(today)?;
        }
        let n = roll.file.write(buf)?;
        roll.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.lock().expect("daemon log poisoned").file.flush()
    }
}

impl RollFile {
    fn rotate(&mut self, today: NaiveDate) -> std::io::Result<()> {
        self.file.flush()?;
        let base = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let rotated = self.path.with_file_name(format!("{base}.{stamp}"));
        std::fs::rename(&self.path, &rotated)?;

        // keep a single sibling
        if let Some(parent) = self.path.parent()
            && let Ok(entries) = std::fs::read_dir(parent)
        {
            let prefix = format!("{base}.");
            let mut siblings: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .map(|n| n.to_string_lossy().starts_with(&prefix))
                        .unwrap_or(false)
                })
                .collect();
            siblings.sort();
            for old in siblings.iter().rev().skip(1) {
                let _ = std::fs::remove_file(old);
            }
        }

        self.file = open_append(&self.path)?;
        self.written = 0;
        self.day = today;
        Ok(())
    }
}

fn open_append(path: &PathBuf) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writes_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.log");
        let mut writer = DaemonLogWriter::open(path.clone()).unwrap();
        writer.write_all(b"started\n").unwrap();
        writer.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "started\n");
    }

    #[test]
    fn test_clones_share_one_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("daemon.log");
        let mut a = DaemonLogWriter::open(path.clone()).unwrap();
        let mut b = a.clone();
        a.write_all(b"a\n").unwrap();
        b.write_all(b"b\n").unwrap();
        a.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
    }
}
