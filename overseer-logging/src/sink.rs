use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::warn;

use crate::rotation::{RotationConfig, RotationPeriod};
use crate::writer::RotatingLogWriter;

/// Rotation caps applied to every file sink of one process.
#[derive(Debug, Clone)]
pub struct SinkPolicy {
    pub keep_count: u32,
    pub max_size: u64,
}

/// One resolved output target. `/dev/stdout`, `/dev/stderr` and
/// `/dev/null` map to the parent streams or discard; anything else is a
/// rotating file.
pub enum Sink {
    Stdout,
    Stderr,
    Null,
    File(RotatingLogWriter),
}

impl Sink {
    pub async fn write(&self, data: &[u8]) {
        match self {
            Sink::Stdout => {
                let _ = tokio::io::stdout().write_all(data).await;
            }
            Sink::Stderr => {
                let _ = tokio::io::stderr().write_all(data).await;
            }
            Sink::Null => {}
            Sink::File(w) => w.write(Bytes::copy_from_slice(data)).await,
        }
    }

    pub async fn close(&self) {
        match self {
            Sink::File(w) => w.close().await,
            Sink::Stdout => {
                let _ = tokio::io::stdout().flush().await;
            }
            Sink::Stderr => {
                let _ = tokio::io::stderr().flush().await;
            }
            Sink::Null => {}
        }
    }
}

/// The per-run writer table: one sink per distinct name, shared between
/// the stdout and stderr lists.
pub struct SinkSet {
    sinks: Vec<(String, Arc<Sink>)>,
}

impl SinkSet {
    pub async fn open(stdout: &[String], stderr: &[String], policy: &SinkPolicy) -> Self {
        let mut sinks: Vec<(String, Arc<Sink>)> = Vec::new();
        for name in stderr.iter().chain(stdout.iter()) {
            if sinks.iter().any(|(n, _)| n == name) {
                continue;
            }
            let sink = resolve(name, policy).await;
            sinks.push((name.clone(), Arc::new(sink)));
        }
        Self { sinks }
    }

    /// The ordered, de-duplicated sinks for one stream.
    pub fn select(&self, names: &[String]) -> Vec<Arc<Sink>> {
        let mut seen: Vec<&str> = Vec::new();
        let mut out = Vec::new();
        for name in names {
            if seen.contains(&name.as_str()) {
                continue;
            }
            seen.push(name);
            if let Some((_, sink)) = self.sinks.iter().find(|(n, _)| n == name) {
                out.push(sink.clone());
            }
        }
        out
    }

    pub async fn close(&self) {
        for (_, sink) in &self.sinks {
            sink.close().await;
        }
    }
}

async fn resolve(name: &str, policy: &SinkPolicy) -> Sink {
    match name {
        "/dev/null" => Sink::Null,
        "/dev/stdout" => Sink::Stdout,
        "/dev/stderr" => Sink::Stderr,
        path => {
            let config = RotationConfig {
                max_size: policy.max_size,
                period: RotationPeriod::Hourly,
                max_files: policy.keep_count,
                compress: false,
            };
            match RotatingLogWriter::open(PathBuf::from(path), config).await {
                Ok(writer) => Sink::File(writer),
                Err(err) => {
                    warn!("create logger {path} fail: {err}");
                    Sink::Null
                }
            }
        }
    }
}

/// Copy a child pipe into its sink list until EOF.
pub async fn pump(mut reader: impl AsyncRead + Unpin, sinks: Vec<Arc<Sink>>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                for sink in &sinks {
                    sink.write(&buf[..n]).await;
                }
            }
        }
    }
}

/// Parse a `K`/`M`/`G` suffixed size ("1G", "512M") or raw byte count.
/// Unparseable or non-positive input falls back to 1G.
pub fn parse_max_log_size(text: &str) -> u64 {
    const K: u64 = 1024;
    const M: u64 = K * 1024;
    const G: u64 = M * 1024;

    let upper = text.trim().to_ascii_uppercase();
    let parse_suffixed = |unit: &str, mult: u64| -> Option<u64> {
        upper
            .strip_suffix(unit)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(|v| v * mult)
    };
    parse_suffixed("G", G)
        .or_else(|| parse_suffixed("M", M))
        .or_else(|| parse_suffixed("K", K))
        .or_else(|| upper.parse::<u64>().ok().filter(|v| *v > 0))
        .unwrap_or(G)
}
