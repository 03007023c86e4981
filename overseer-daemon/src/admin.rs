use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tracing::{error, info, warn};

use crate::command::panic_message;
use crate::process::ProcessSnapshot;
use crate::supervisor::{StopOption, Supervisord};
use overseer_core::{Error, ProcessConfig, Result};
use overseer_http::AdminAddr;

const CLOSE_GRACE: Duration = Duration::from_millis(50);

/// The admin listener handle. `reload` swaps the listen address
/// atomically: the old listener is fully closed before the new one opens.
pub struct AdminServer {
    running: Mutex<Option<Running>>,
}

struct Running {
    addr: AdminAddr,
    shutdown: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl AdminServer {
    pub(crate) fn new() -> Self {
        Self {
            running: Mutex::new(None),
        }
    }

    pub(crate) async fn start(&self, addr: AdminAddr, sup: Arc<Supervisord>) -> Result<()> {
        let app = build_router(sup);
        let (tx, rx) = oneshot::channel::<()>();
        let shutdown = async move {
            let _ = rx.await;
        };
        let handle = match &addr {
            AdminAddr::Tcp { .. } => {
                let listener = tokio::net::TcpListener::bind(addr.listen_addr()).await?;
                tokio::spawn(async move {
                    if let Err(err) = axum::serve(listener, app)
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        log_serve_error(&err);
                    }
                })
            }
            AdminAddr::Unix { path } => {
                if let Some(dir) = path.parent()
                    && !dir.as_os_str().is_empty()
                {
                    tokio::fs::create_dir_all(dir).await?;
                }
                if let Err(err) = tokio::fs::remove_file(path).await
                    && err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("remove stale admin socket fail: {err}");
                }
                let listener = tokio::net::UnixListener::bind(path)?;
                tokio::spawn(async move {
                    if let Err(err) = axum::serve(listener, app)
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        log_serve_error(&err);
                    }
                })
            }
        };
        info!("admin server listening on {addr}");
        *self.running.lock().await = Some(Running {
            addr,
            shutdown: tx,
            handle,
        });
        Ok(())
    }

    pub(crate) async fn reload(&self, addr: AdminAddr, sup: Arc<Supervisord>) {
        {
            let running = self.running.lock().await;
            if matches!(&*running, Some(r) if r.addr == addr) {
                return;
            }
        }
        self.stop().await;
        if let Err(err) = self.start(addr, sup).await {
            warn!("admin server restart fail: {err}");
        }
    }

    pub(crate) async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        let mut handle = running.handle;
        if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
            handle.abort();
        }
    }
}

/// Error envelope every endpoint shares: 400 with `{"code":-1,"message"}`.
struct ApiError(String);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": -1, "message": self.0})),
        )
            .into_response()
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

fn ok() -> Response {
    "OK\n".into_response()
}

fn fmt_params(params: &HashMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn flag(params: &HashMap<String, String>, key: &str) -> bool {
    params.get(key).is_some_and(|v| v == "true")
}

fn name_param(params: &HashMap<String, String>) -> String {
    params.get("name").cloned().unwrap_or_default()
}

pub fn build_router(sup: Arc<Supervisord>) -> Router {
    crate::panic_trace::install_hook();
    Router::new()
        .route("/start", get(cmd_start))
        .route("/stop", get(cmd_stop))
        .route("/restart", get(cmd_restart))
        .route("/omit_exit_code", get(cmd_omit_exit_code))
        .route("/reload", get(cmd_reload))
        .route("/add_process", post(cmd_add_process))
        .route("/command", post(cmd_command))
        .route("/shutdown", get(cmd_shutdown))
        .route("/status", get(cmd_status))
        .layer(middleware::from_fn(recover_panics))
        .with_state(sup)
}

/// A panicking handler must not take the server down with it: recover at
/// the router boundary and answer with the error envelope.
async fn recover_panics(req: Request, next: Next) -> Response {
    let handled = futures::FutureExt::catch_unwind(AssertUnwindSafe(next.run(req))).await;
    match handled {
        Ok(resp) => resp,
        Err(panic) => {
            let message = panic_message(&panic).to_string();
            error!(
                "admin handler fail: {message}\n{}",
                crate::panic_trace::take_backtrace()
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"code": -1, "message": message})),
            )
                .into_response()
        }
    }
}

/// Disconnecting clients are routine; only unexpected listener failures
/// deserve a warning.
fn log_serve_error(err: &std::io::Error) {
    match err.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
            info!("admin connection closed: {err}");
        }
        _ => warn!("admin server listen err {err}"),
    }
}

async fn cmd_start(
    State(sup): State<Arc<Supervisord>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    info!("[admin-api] start {}", fmt_params(&params));
    if flag(&params, "all") {
        sup.start_all(true).await?;
        return Ok(ok());
    }
    sup.start_process(&name_param(&params)).await?;
    Ok(ok())
}

async fn cmd_stop(
    State(sup): State<Arc<Supervisord>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    info!("[admin-api] stop {}", fmt_params(&params));
    if flag(&params, "all") {
        sup.stop_all().await?;
        return Ok(ok());
    }
    sup.stop_process(&name_param(&params)).await?;
    Ok(ok())
}

async fn cmd_restart(
    State(sup): State<Arc<Supervisord>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    info!("[admin-api] restart {}", fmt_params(&params));
    if flag(&params, "all") {
        sup.restart_all().await?;
        return Ok(ok());
    }
    sup.restart_process(&name_param(&params)).await?;
    Ok(ok())
}

async fn cmd_omit_exit_code(
    State(sup): State<Arc<Supervisord>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    info!("[admin-api] omit exit code {}", fmt_params(&params));
    if flag(&params, "all") {
        sup.omit_all_process_exit_code().await?;
        return Ok(ok());
    }
    sup.omit_process_exit_code(&name_param(&params)).await?;
    Ok(ok())
}

async fn cmd_reload(
    State(sup): State<Arc<Supervisord>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    info!("[admin-api] reload {}", fmt_params(&params));
    if let Err(err) = sup.check_config_file() {
        warn!("reload config {err}");
        return Err(err.into());
    }
    if let Err(err) = sup.reload().await {
        warn!("reload config {err}");
        return Err(err.into());
    }
    Ok(ok())
}

async fn cmd_add_process(State(sup): State<Arc<Supervisord>>, body: Bytes) -> ApiResult {
    info!("[admin-api] add process");
    if body.is_empty() {
        return Err(ApiError("no body found".to_string()));
    }
    let config: ProcessConfig =
        serde_json::from_slice(&body).map_err(|e| ApiError(e.to_string()))?;
    if config.name.is_empty() {
        return Err(ApiError("bad proc".to_string()));
    }
    sup.add_proc(config).await?;
    Ok(Json(json!({"code": 0, "message": "ok"})).into_response())
}

async fn cmd_command(
    State(sup): State<Arc<Supervisord>>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> ApiResult {
    info!("[admin-api] run command {}", fmt_params(&params));
    if sup.config().disable_rce {
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    }
    let output = sup
        .run_admin_command(&body, flag(&params, "capture_stdout"))
        .await?;
    Ok(String::from_utf8_lossy(&output).into_owned().into_response())
}

async fn cmd_shutdown(
    State(sup): State<Arc<Supervisord>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    info!("[admin-api] shutdown {}", fmt_params(&params));
    let option = StopOption {
        stop_immediately: flag(&params, "now"),
        clear_log: flag(&params, "clear"),
    };
    // Answer first: the stop sequence tears this listener down.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        sup.stop(option).await;
    });
    Ok(ok())
}

async fn cmd_status(
    State(sup): State<Arc<Supervisord>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    info!("[admin-api] status {}", fmt_params(&params));
    let snapshots = sup.snapshots().await;
    if params.get("format").map(String::as_str) == Some("json") {
        return Ok(Json(snapshots).into_response());
    }
    Ok(render_status_table(&snapshots).into_response())
}

fn render_status_table(snapshots: &[ProcessSnapshot]) -> String {
    let header = ["name", "pid", "state", "start-time", "stop-time", "restart"];
    let rows: Vec<[String; 6]> = snapshots
        .iter()
        .map(|s| {
            [
                s.config.name.clone(),
                s.pid.clone(),
                s.state.to_string(),
                fmt_unix(s.start_time),
                fmt_unix(s.stop_time),
                s.restart.to_string(),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    let line = |out: &mut String, cells: &[&str]| {
        for (i, cell) in cells.iter().enumerate() {
            out.push_str(&format!("| {:<width$} ", cell, width = widths[i]));
        }
        out.push_str("|\n");
    };
    let rule = |out: &mut String| {
        for w in &widths {
            out.push_str(&format!("+{}", "-".repeat(w + 2)));
        }
        out.push_str("+\n");
    };

    rule(&mut out);
    line(&mut out, &header);
    rule(&mut out);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        line(&mut out, &cells);
    }
    rule(&mut out);
    out
}

fn fmt_unix(ts: i64) -> String {
    if ts == 0 {
        return "-".to_string();
    }
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    async fn boom() -> &'static str {
        panic!("handler blew up");
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_error_envelope() {
        crate::panic_trace::install_hook();
        let app = Router::new()
            .route("/boom", get(boom))
            .layer(middleware::from_fn(recover_panics));

        let resp = app
            .oneshot(HttpRequest::get("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], -1);
        assert!(body["message"].as_str().unwrap().contains("handler blew up"));
    }
}

