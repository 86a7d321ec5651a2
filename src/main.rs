//! Entrypoint: serves `runtime.v1.RuntimeService` over a Unix-domain
//! socket for the kubelet, with the exec/port-forward streaming server
//! running alongside it (spec §4.5, §6).

use std::fs::{create_dir_all, remove_file};
use std::sync::Arc;

use clap::Parser;
use tokio::net::UnixListener;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;

use lxe::backend::Backend;
use lxe::backend::lxd::LxdBackend;
use lxe::config::{self, Args};
use lxe::cri_service::CriService;
use lxe::orchestrator::Orchestrator;
use lxe::proto::runtime::v1::runtime_service_server::RuntimeServiceServer;
use lxe::streaming::StreamingServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let network_plugin_kind = args.network_plugin_kind()?;
    let lxd_remote = config::resolve_lxd_remote(&args.lxd_remote_config);

    let backend: Arc<dyn Backend> = Arc::new(LxdBackend::new(lxd_remote, args.lxd_profiles.clone()));
    let orchestrator = Arc::new(Orchestrator::new(backend, network_plugin_kind, args.hostnetwork_file.clone()));
    let streaming = Arc::new(StreamingServer::new(
        orchestrator.clone(),
        &args.streaming_server_endpoint,
        args.streaming_port,
    )?);

    let streaming_task = tokio::spawn(streaming.clone().serve());

    let mut sigterm = signal(SignalKind::terminate()).unwrap_or_else(|err| panic!("cannot listen for SIGTERM: {err}"));
    let mut sigint = signal(SignalKind::interrupt()).unwrap_or_else(|err| panic!("cannot listen for SIGINT: {err}"));
    let shutdown_signal = async move {
        select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    };

    if let Some(parent) = args.socket.parent() {
        create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(&args.socket).unwrap_or_else(|err| panic!("cannot bind Unix socket '{}': {err}", args.socket.display()));

    tracing::info!(socket = %args.socket.display(), "lxed: listening for CRI requests");
    let result = Server::builder()
        .add_service(RuntimeServiceServer::new(CriService::new(orchestrator, streaming)))
        .serve_with_incoming_shutdown(UnixListenerStream::new(listener), shutdown_signal)
        .await;

    let unlink_result = remove_file(&args.socket);
    streaming_task.abort();

    result?;
    unlink_result?;
    Ok(())
}
