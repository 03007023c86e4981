use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{error, warn};

use crate::rotation::{LogRotation, RotationConfig};
use overseer_core::Result;

const QUEUE_DEPTH: usize = 10_000;
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

enum Cmd {
    Write(Bytes),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Append-only log file with rotation, fed through a background task so
/// that many producers can share one file without a lock on the write
/// path.
#[derive(Debug)]
pub struct RotatingLogWriter {
    tx: mpsc::Sender<Cmd>,
}

impl RotatingLogWriter {
    pub async fn open(path: PathBuf, config: RotationConfig) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }
        let file = open_append(&path).await?;
        let size = file.get_ref().metadata().await.map(|m| m.len()).unwrap_or(0);

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(writer_task(path, config, file, size, rx));
        Ok(Self { tx })
    }

    pub async fn write(&self, data: Bytes) {
        let _ = self.tx.send(Cmd::Write(data)).await;
    }

    /// Non-blocking write used from drop paths; data is dropped when the
    /// queue is full.
    pub fn try_write(&self, data: Bytes) {
        let _ = self.tx.try_send(Cmd::Write(data));
    }

    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Cmd::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Cmd::Close(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn writer_task(
    path: PathBuf,
    config: RotationConfig,
    file: BufWriter<File>,
    size: u64,
    mut rx: mpsc::Receiver<Cmd>,
) {
    let mut file = file;
    let mut size = size;
    let mut rotation = LogRotation::new(config);
    let mut ticker = time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = file.flush().await;
            }
            cmd = rx.recv() => match cmd {
                Some(Cmd::Write(data)) => {
                    if rotation.should_rotate(size + data.len() as u64) {
                        match rotate(&path, &mut rotation, &mut file).await {
                            Ok(fresh) => {
                                file = fresh;
                                size = 0;
                            }
                            Err(err) => error!("rotate {:?} fail: {err}", path),
                        }
                    }
                    if let Err(err) = file.write_all(&data).await {
                        warn!("write {:?} fail: {err}", path);
                    } else {
                        size += data.len() as u64;
                    }
                }
                Some(Cmd::Flush(done)) => {
                    let _ = file.flush().await;
                    let _ = done.send(());
                }
                Some(Cmd::Close(done)) => {
                    let _ = file.flush().await;
                    let _ = done.send(());
                    return;
                }
                None => {
                    let _ = file.flush().await;
                    return;
                }
            }
        }
    }
}

async fn rotate(
    path: &PathBuf,
    rotation: &mut LogRotation,
    file: &mut BufWriter<File>,
) -> Result<BufWriter<File>> {
    file.flush().await?;
    rotation.rotate(path)?;
    open_append(path).await
}

async fn open_append(path: &PathBuf) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(BufWriter::with_capacity(8192, file))
}
