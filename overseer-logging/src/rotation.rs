use chrono::{DateTime, Local, Timelike};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use overseer_core::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPeriod {
    Never,
    Hourly,
    Daily,
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Rotate when the current file reaches this many bytes. 0 disables
    /// the size trigger.
    pub max_size: u64,
    pub period: RotationPeriod,
    pub max_files: u32,
    pub compress: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_size: 1024 * 1024 * 1024,
            period: RotationPeriod::Hourly,
            max_files: 48,
            compress: false,
        }
    }
}

/// Rotation bookkeeping for one log file.
///
/// Rotated files keep the full base name as a prefix
/// (`svc.log` becomes `svc.log.20260802143000`), so a `svc.log*` glob
/// matches the live file and every sibling.
#[derive(Debug)]
pub struct LogRotation {
    config: RotationConfig,
    last_rotation: DateTime<Local>,
}

impl LogRotation {
    pub fn new(config: RotationConfig) -> Self {
        Self {
            config,
            last_rotation: Local::now(),
        }
    }

    pub fn should_rotate(&self, current_size: u64) -> bool {
        if self.config.max_size > 0 && current_size >= self.config.max_size {
            return true;
        }
        let now = Local::now();
        match self.config.period {
            RotationPeriod::Never => false,
            RotationPeriod::Daily => now.date_naive() != self.last_rotation.date_naive(),
            RotationPeriod::Hourly => {
                now.date_naive() != self.last_rotation.date_naive()
                    || now.hour() != self.last_rotation.hour()
            }
        }
    }

    /// Rename the live file aside and prune old siblings. Blocking; run it
    /// off the async path.
    pub fn rotate(&mut self, log_path: &Path) -> Result<()> {
        if !log_path.exists() {
            self.last_rotation = Local::now();
            return Ok(());
        }

        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let base = log_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let rotated = log_path.with_file_name(format!("{base}.{stamp}"));

        debug!("rotating {:?} to {:?}", log_path, rotated);
        if self.config.compress {
            let gz = rotated.with_file_name(format!("{base}.{stamp}.gz"));
            if let Err(err) = compress_into(log_path, &gz) {
                warn!("compress rotation fail, falling back to rename: {err}");
                fs::rename(log_path, &rotated)?;
            } else {
                fs::remove_file(log_path)?;
            }
        } else {
            fs::rename(log_path, &rotated)?;
        }

        self.cleanup_old_files(log_path)?;
        self.last_rotation = Local::now();
        Ok(())
    }

    fn cleanup_old_files(&self, log_path: &Path) -> Result<()> {
        let Some(parent) = log_path.parent() else {
            return Ok(());
        };
        let base = log_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let prefix = format!("{base}.");

        let mut rotated: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
        for entry in fs::read_dir(parent)? {
            let entry = entry?;
            let path = entry.path();
            if path == log_path {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) {
                continue;
            }
            match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => rotated.push((path, modified)),
                Err(err) => warn!("stat rotated log {:?} fail: {err}", path),
            }
        }

        rotated.sort_by(|a, b| b.1.cmp(&a.1));
        for (path, _) in rotated.iter().skip(self.config.max_files as usize) {
            match fs::remove_file(path) {
                Ok(()) => debug!("removed old log {:?}", path),
                Err(err) => warn!("remove old log {:?} fail: {err}", path),
            }
        }
        Ok(())
    }
}

fn compress_into(source: &Path, dest: &Path) -> Result<()> {
    let input = fs::File::open(source)?;
    let mut reader = std::io::BufReader::with_capacity(65536, input);
    let output = fs::File::create(dest)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut reader, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}
