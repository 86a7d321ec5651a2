//! Streaming service (spec §4.5): a side-channel HTTP server hosting
//! interactive `Exec` and `PortForward` sessions. `RuntimeService::Exec`
//! and `RuntimeService::PortForward` hand the kubelet a one-time URL on
//! this server; the kubelet's client then opens the actual stdio session.
//!
//! The CRI contract describes this handshake in terms of the standard
//! Kubernetes streaming libraries (SPDY/WebSocket upgrade). There is no
//! off-the-shelf Rust equivalent in this stack, so sessions here are plain
//! WebSocket upgrades (`axum`'s `ws` feature, already part of the RPC
//! surface's dependency): binary frames carry stdout (tag `1`) or stderr
//! (tag `2`) from the server, raw stdin bytes from the client, and a
//! control JSON text frame carries resize events.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::TerminalSize;
use crate::error::{Error, Result};
use crate::orchestrator::{Orchestrator, host_outbound_ip};

const STDOUT_TAG: u8 = 1;
const STDERR_TAG: u8 = 2;
/// `socat` must be reachable on `$PATH` for port-forward (spec §6).
const SOCAT_BINARY: &str = "socat";

#[derive(Clone)]
enum StreamRequest {
    Exec {
        container_id: String,
        cmd: Vec<String>,
        tty: bool,
        interactive: bool,
    },
    PortForward {
        sandbox_id: String,
        ports: Vec<u16>,
    },
}

/// Owns the one-time session table and advertises `BaseURL` for `Exec`
/// and `PortForward` responses (spec §4.5). Shared by every concurrent
/// session (spec §5).
pub struct StreamingServer {
    orchestrator: Arc<Orchestrator>,
    bind_addr: SocketAddr,
    base_url: String,
    requests: Mutex<HashMap<String, StreamRequest>>,
}

impl StreamingServer {
    pub fn new(orchestrator: Arc<Orchestrator>, endpoint: &str, port: u16) -> Result<Self> {
        let bind_addr: SocketAddr = format!("{endpoint}:{port}")
            .parse()
            .map_err(|e: std::net::AddrParseError| Error::StreamingSetupFailure(anyhow::anyhow!(e)))?;
        let advertised_ip = host_outbound_ip().unwrap_or_else(|| "127.0.0.1".to_string());
        Ok(StreamingServer {
            orchestrator,
            bind_addr,
            base_url: format!("http://{advertised_ip}:{port}"),
            requests: Mutex::new(HashMap::new()),
        })
    }

    fn register(&self, request: StreamRequest) -> String {
        let token = Uuid::new_v4().to_string();
        self.requests.lock().unwrap().insert(token.clone(), request);
        token
    }

    fn take(&self, token: &str) -> Option<StreamRequest> {
        self.requests.lock().unwrap().remove(token)
    }

    /// `RuntimeService::Exec`: hand back a one-time URL the kubelet's
    /// client uses to open the interactive session (spec §4.5, §6).
    pub fn exec_url(&self, container_id: &str, cmd: Vec<String>, tty: bool, interactive: bool) -> String {
        let token = self.register(StreamRequest::Exec { container_id: container_id.to_string(), cmd, tty, interactive });
        format!("{}/exec/{token}", self.base_url)
    }

    /// `RuntimeService::PortForward`: same handshake, scoped to a sandbox
    /// and its requested ports.
    pub fn port_forward_url(&self, sandbox_id: &str, ports: Vec<u16>) -> String {
        let token = self.register(StreamRequest::PortForward { sandbox_id: sandbox_id.to_string(), ports });
        format!("{}/portforward/{token}", self.base_url)
    }

    /// Run the HTTP listener until the process is torn down. Errors here
    /// are `StreamingSetupFailure` (spec §7); an in-flight session's own
    /// failures never propagate back to this future.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let app = Router::new()
            .route("/exec/:token", get(handle_exec))
            .route("/portforward/:token", get(handle_port_forward))
            .with_state(self.clone());

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| Error::StreamingSetupFailure(e.into()))?;
        info!(addr = %self.bind_addr, base_url = %self.base_url, "streaming: listening");
        axum::serve(listener, app)
            .await
            .map_err(|e| Error::StreamingSetupFailure(e.into()))
    }
}

async fn handle_exec(
    State(server): State<Arc<StreamingServer>>,
    Path(token): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(StreamRequest::Exec { container_id, cmd, tty, interactive }) = server.take(&token) else {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    };
    ws.on_upgrade(move |socket| run_exec(server, socket, container_id, cmd, tty, interactive))
}

/// Wires an upgraded socket to [`crate::backend::Backend::exec_streamed`]:
/// stdin from client binary frames, stdout/stderr back as tagged binary
/// frames, resize from a JSON control text frame (spec §4.5).
async fn run_exec(server: Arc<StreamingServer>, socket: WebSocket, container_id: String, cmd: Vec<String>, tty: bool, interactive: bool) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (stdin_writer, stdin_reader) = tokio::io::duplex(8192);
    let (stdout_writer, mut stdout_reader) = tokio::io::duplex(8192);
    let (stderr_writer, mut stderr_reader) = tokio::io::duplex(8192);
    let (resize_tx, resize_rx) = mpsc::channel(8);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(32);

    let backend = server.orchestrator.backend();
    let exec_task = tokio::spawn(async move {
        backend
            .exec_streamed(&container_id, &cmd, tty, interactive, Box::pin(stdin_reader), Box::pin(stdout_writer), Box::pin(stderr_writer), resize_rx)
            .await
    });

    let stdout_tx = outbound_tx.clone();
    let stdout_task = tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match stdout_reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut frame = vec![STDOUT_TAG];
                    frame.extend_from_slice(&buf[..n]);
                    if stdout_tx.send(Message::Binary(frame)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    let stderr_tx = outbound_tx.clone();
    let stderr_task = tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match stderr_reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut frame = vec![STDERR_TAG];
                    frame.extend_from_slice(&buf[..n]);
                    if stderr_tx.send(Message::Binary(frame)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    drop(outbound_tx);

    let sender_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut stdin_writer = stdin_writer;
    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Binary(bytes) if stdin_writer.write_all(&bytes).await.is_err() => break,
            Message::Binary(_) => {}
            Message::Text(text) => {
                if let Ok(size) = serde_json::from_str::<ResizeMessage>(&text) {
                    let _ = resize_tx.send(TerminalSize { width: size.width, height: size.height }).await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    drop(stdin_writer);

    match exec_task.await {
        Ok(Ok(code)) if code != 0 => {
            warn!(exit_code = code, "streaming exec: non-zero exit");
        }
        Ok(Err(e)) => warn!(error = %e, "streaming exec: backend failure"),
        Err(e) => warn!(error = %e, "streaming exec: task panicked"),
        Ok(Ok(_)) => {}
    }

    let _ = stdout_task.await;
    let _ = stderr_task.await;
    let _ = sender_task.await;
}

#[derive(Deserialize)]
struct ResizeMessage {
    width: u16,
    height: u16,
}

#[derive(Deserialize)]
struct PortForwardQuery {
    port: u16,
}

async fn handle_port_forward(
    State(server): State<Arc<StreamingServer>>,
    Path(token): Path<String>,
    Query(query): Query<PortForwardQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(StreamRequest::PortForward { sandbox_id, ports }) = server.take(&token) else {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    };
    if !ports.contains(&query.port) {
        return axum::http::StatusCode::BAD_REQUEST.into_response();
    }
    ws.on_upgrade(move |socket| run_port_forward(server, socket, sandbox_id, query.port))
}

/// Spawns `socat` as a local TCP forwarder to the pod's IP and plumbs the
/// websocket to its stdio (spec §4.5). Stdin is copied through a pipe
/// rather than a direct attach so the child's stdin closes (and the
/// process tears down cleanly) as soon as the client session ends — see
/// spec §9 "port-forward stdin pipe".
async fn run_port_forward(server: Arc<StreamingServer>, socket: WebSocket, sandbox_id: String, port: u16) {
    let pod_ip = match server.orchestrator.pod_ip(&sandbox_id).await {
        Ok(ip) if !ip.is_empty() => ip,
        Ok(_) => {
            warn!(sandbox_id = %sandbox_id, "port-forward: pod has no known IP");
            return;
        }
        Err(e) => {
            warn!(sandbox_id = %sandbox_id, error = %e, "port-forward: failed to resolve pod ip");
            return;
        }
    };

    let mut child = match Command::new(SOCAT_BINARY)
        .arg("-")
        .arg(format!("TCP4:{pod_ip}:{port},keepalive"))
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!(sandbox_id = %sandbox_id, port, error = %e, "port-forward: socat not found on PATH");
            return;
        }
    };

    let mut child_stdin = child.stdin.take().expect("piped stdin");
    let mut child_stdout = child.stdout.take().expect("piped stdout");
    let mut child_stderr = child.stderr.take().expect("piped stderr");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(32);

    let stdout_task = tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match child_stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if outbound_tx.send(Message::Binary(buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let sender_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = child_stderr.read_to_end(&mut buf).await;
        buf
    });

    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            Message::Binary(bytes) if child_stdin.write_all(&bytes).await.is_err() => break,
            Message::Binary(_) => {}
            Message::Close(_) => break,
            _ => {}
        }
    }
    drop(child_stdin);

    let status = child.wait().await;
    let stderr = stderr_task.await.unwrap_or_default();
    match status {
        Ok(status) if !status.success() => {
            warn!(
                sandbox_id = %sandbox_id,
                port,
                status = %status,
                stderr = %String::from_utf8_lossy(&stderr),
                "port-forward: socat exited with an error"
            );
        }
        Err(e) => warn!(sandbox_id = %sandbox_id, port, error = %e, "port-forward: failed to wait for socat"),
        Ok(_) => {}
    }

    let _ = stdout_task.await;
    let _ = sender_task.await;
}
