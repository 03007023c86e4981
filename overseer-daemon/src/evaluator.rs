use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

use overseer_core::{Error, Result, SupervisorConfig};

/// Evaluator for admin `exec` payloads. The admin surface treats the
/// language as opaque: source in, bytes out.
#[async_trait]
pub trait ScriptEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        config: &SupervisorConfig,
        source: &[u8],
        capture_stdout: bool,
    ) -> Result<Vec<u8>>;
}

/// Pipes the payload to `bash` with the active config exposed as JSON in
/// `OVERSEER_CONFIG`. Stdout is returned when captured, logged otherwise;
/// stderr always goes to the log.
pub struct ShellEvaluator;

#[async_trait]
impl ScriptEvaluator for ShellEvaluator {
    async fn evaluate(
        &self,
        config: &SupervisorConfig,
        source: &[u8],
        capture_stdout: bool,
    ) -> Result<Vec<u8>> {
        let config_json =
            serde_json::to_string(config).map_err(|e| Error::Config(e.to_string()))?;
        let mut child = Command::new("bash")
            .env("OVERSEER_CONFIG", config_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(source).await?;
        }
        let output = child.wait_with_output().await?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            info!("{line}");
        }
        if !output.status.success() {
            return Err(Error::Admin(format!(
                "command exit with code {}",
                output.status.code().unwrap_or(-1)
            )));
        }
        if capture_stdout {
            Ok(output.stdout)
        } else {
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                info!("{line}");
            }
            Ok(Vec::new())
        }
    }
}
