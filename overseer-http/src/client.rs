use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::http::{Method, Request, StatusCode, header};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio::time::timeout;
use tracing::debug;

use crate::addr::AdminAddr;
use overseer_core::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP/1.1 client for the admin endpoint, dialing TCP or a Unix socket.
/// One connection per request; the control plane is low-traffic.
pub struct AdminClient {
    addr: AdminAddr,
    timeout: Duration,
}

impl AdminClient {
    pub fn new(addr: AdminAddr) -> Self {
        Self {
            addr,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn from_config(cnf: &overseer_core::SupervisorConfig) -> Self {
        Self::new(AdminAddr::from_config(cnf))
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn addr(&self) -> &AdminAddr {
        &self.addr
    }

    /// GET, returning the trimmed response body. Non-2xx responses are
    /// turned into [`Error::Admin`] with the server's message.
    pub async fn get(&self, path: &str) -> Result<String> {
        self.request(Method::GET, path, None, None).await
    }

    pub async fn post_json<T: Serialize>(&self, path: &str, payload: &T) -> Result<String> {
        let body = serde_json::to_vec(payload).map_err(|e| Error::Http(e.to_string()))?;
        self.request(
            Method::POST,
            path,
            Some(Bytes::from(body)),
            Some("application/json"),
        )
        .await
    }

    pub async fn post_raw(&self, path: &str, body: Vec<u8>) -> Result<String> {
        self.request(Method::POST, path, Some(Bytes::from(body)), None)
            .await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
        content_type: Option<&str>,
    ) -> Result<String> {
        debug!("admin {method} {path} via {}", self.addr);
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(header::HOST, "admin");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        let req = builder
            .body(Full::new(body.unwrap_or_default()))
            .map_err(|e| Error::Http(e.to_string()))?;

        let fut = async {
            match &self.addr {
                AdminAddr::Tcp { .. } => {
                    let stream = TcpStream::connect(self.addr.dial_addr())
                        .await
                        .map_err(|_| Error::NotRunning(self.addr.dial_addr()))?;
                    send_over(stream, req).await
                }
                AdminAddr::Unix { path } => {
                    let stream = UnixStream::connect(path)
                        .await
                        .map_err(|_| Error::NotRunning(self.addr.dial_addr()))?;
                    send_over(stream, req).await
                }
            }
        };
        let (status, bytes) = timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::Http("request timeout".into()))??;

        let text = String::from_utf8_lossy(&bytes).trim().to_string();
        if status.is_success() {
            return Ok(text);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Admin("remote command execution disabled".into()));
        }
        // error envelope: {"code":-1,"message":...}
        let message = serde_json::from_slice::<serde_json::Value>(&bytes)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(text);
        Err(Error::Admin(message))
    }
}

async fn send_over<S>(stream: S, req: Request<Full<Bytes>>) -> Result<(StatusCode, Bytes)>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| Error::Http(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!("admin connection closed: {err}");
        }
    });

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| Error::Http(e.to_string()))?;
    let status = resp.status();
    let bytes = resp
        .collect()
        .await
        .map_err(|e| Error::Http(e.to_string()))?
        .to_bytes();
    Ok((status, bytes))
}
