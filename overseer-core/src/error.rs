use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("start command fail: {0}")]
    Spawn(String),

    #[error("abandon start command")]
    AbandonStart,

    #[error("process {0} no exist")]
    ProcessNotFound(String),

    #[error("Error: {0} is running")]
    ProcessRunning(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("fail to find supervisord.conf")]
    ConfigFileNotFound,

    #[error("unknown signal {0}")]
    UnknownSignal(String),

    #[error("unknown user {0}")]
    UnknownUser(String),

    #[error("unknown group {0}")]
    UnknownGroup(String),

    #[error("supervisord not running on {0}")]
    NotRunning(String),

    #[error("{0}")]
    Admin(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("unix error: {0}")]
    Unix(#[from] nix::errno::Errno),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
