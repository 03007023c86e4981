use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::config::SupervisorConfig;
use crate::{Error, Result};

const LOCK_SUFFIX: &str = ".lock";

struct ConfigInfo {
    file: Option<PathBuf>,
    config: Arc<SupervisorConfig>,
}

/// Loads and persists the TOML configuration.
///
/// A master instance keeps a dot-prefixed `.<basename>.lock` copy beside
/// the canonical file while it is live; client instances prefer the lock
/// copy so they always see the running master's effective config. The
/// master removes the lock on [`ConfigProvider::close`].
pub struct ConfigProvider {
    master_mode: bool,
    // Set when the config file was named explicitly; discovery is skipped.
    explicit_file: Option<PathBuf>,
    info: ArcSwap<ConfigInfo>,
}

impl ConfigProvider {
    /// Discover and load the config from the default locations
    /// (`<exe>/../conf/supervisord.conf`, then `<exe>/supervisord.conf`).
    /// Missing or unreadable files leave a blank config in place.
    pub fn new(master_mode: bool) -> Self {
        let p = Self::empty(master_mode);
        if let Err(err) = p.load(true) {
            debug!("load config: {err}");
        }
        p
    }

    /// Load from an explicit file instead of the discovery paths. In
    /// master mode a missing file is a fresh install: the provider starts
    /// blank and [`ConfigProvider::update`] creates the file.
    pub fn from_file(file: impl AsRef<Path>, master_mode: bool) -> Result<Self> {
        let file = file.as_ref().to_path_buf();
        let mut p = Self::empty(master_mode);
        p.explicit_file = Some(file.clone());
        if master_mode {
            match p.load_file(&file) {
                Ok(()) => p.sync_config_lock(&p.get_config(), &file)?,
                Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        } else {
            let lock = lock_file_for(&file);
            if p.load_file(&lock).is_err() {
                p.load_file(&file)?;
            }
        }
        Ok(p)
    }

    fn empty(master_mode: bool) -> Self {
        Self {
            master_mode,
            explicit_file: None,
            info: ArcSwap::new(Arc::new(ConfigInfo {
                file: None,
                config: Arc::new(SupervisorConfig::default()),
            })),
        }
    }

    pub fn get_config(&self) -> Arc<SupervisorConfig> {
        self.info.load().config.clone()
    }

    pub fn config_file(&self) -> Option<PathBuf> {
        self.info.load().file.clone()
    }

    /// Re-read the canonical file from disk (never the lock copy) and
    /// refresh the lock copy in master mode.
    pub fn reload(&self) -> Result<Arc<SupervisorConfig>> {
        let file = self.canonical_file()?;
        self.load_file(&file)?;
        let config = self.get_config();
        self.sync_config_lock(&config, &file)?;
        Ok(config)
    }

    /// Persist a new config to the canonical file and the lock copy.
    pub fn update(&self, config: SupervisorConfig) -> Result<()> {
        let file = self
            .config_file()
            .or_else(|| self.explicit_file.clone())
            .unwrap_or_else(default_config_file);
        if let Some(dir) = file.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&file, config.to_toml()?)?;
        let config = Arc::new(config);
        self.info.store(Arc::new(ConfigInfo {
            file: Some(file.clone()),
            config: config.clone(),
        }));
        self.sync_config_lock(&config, &file)
    }

    /// Validate that the canonical file exists and parses.
    pub fn check_config_file(&self) -> Result<()> {
        let file = self.canonical_file()?;
        let text = std::fs::read_to_string(file)?;
        SupervisorConfig::from_toml(&text)?;
        Ok(())
    }

    fn canonical_file(&self) -> Result<PathBuf> {
        match &self.explicit_file {
            Some(file) => Ok(file.clone()),
            None => find_config_file(),
        }
    }

    /// Drop the lock copy. Only meaningful in master mode.
    pub fn close(&self) {
        if !self.master_mode {
            return;
        }
        if let Some(file) = self.config_file() {
            let lock = if is_lock_file(&file) {
                file
            } else {
                lock_file_for(&file)
            };
            let _ = std::fs::remove_file(lock);
        }
    }

    fn load(&self, is_init: bool) -> Result<()> {
        let file = find_config_file()?;
        let prefer_lock = !(self.master_mode && is_init);
        if prefer_lock {
            let lock = lock_file_for(&file);
            if lock != file && self.load_file(&lock).is_ok() {
                return Ok(());
            }
        }
        self.load_file(&file)?;
        self.sync_config_lock(&self.get_config(), &file)
    }

    fn load_file(&self, file: &Path) -> Result<()> {
        let text = std::fs::read_to_string(file)?;
        let config = SupervisorConfig::from_toml(&text)?;
        self.info.store(Arc::new(ConfigInfo {
            file: Some(file.to_path_buf()),
            config: Arc::new(config),
        }));
        Ok(())
    }

    fn sync_config_lock(&self, config: &SupervisorConfig, file: &Path) -> Result<()> {
        if !self.master_mode || is_lock_file(file) {
            return Ok(());
        }
        std::fs::write(lock_file_for(file), config.to_toml()?)?;
        Ok(())
    }
}

fn is_lock_file(file: &Path) -> bool {
    file.to_string_lossy().ends_with(LOCK_SUFFIX)
}

fn lock_file_for(file: &Path) -> PathBuf {
    if is_lock_file(file) {
        return file.to_path_buf();
    }
    let base = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    file.with_file_name(format!(".{base}{LOCK_SUFFIX}"))
}

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_config_file() -> PathBuf {
    exe_dir().join("../conf/supervisord.conf")
}

fn find_config_file() -> Result<PathBuf> {
    let dir = exe_dir();
    let candidates = [
        dir.join("../conf/supervisord.conf"),
        dir.join("supervisord.conf"),
    ];
    for file in candidates {
        if file.exists() {
            return Ok(std::path::absolute(&file).unwrap_or(file));
        }
    }
    Err(Error::ConfigFileNotFound)
}
