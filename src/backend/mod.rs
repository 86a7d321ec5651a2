//! Backend client adapter: a thin typed facade over the external
//! container manager (spec §2). The rest of the core only ever touches
//! [`Backend`] and the record types below; nothing upstream knows whether
//! requests ultimately cross a Unix socket to `lxd` or stay in memory.

pub mod fake;
pub mod lxd;

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxMetadata {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Ready,
    NotReady,
}

impl SandboxState {
    /// Backend state string, lowercase, per the `SANDBOX_<UPPER>` rule of
    /// spec §4.1 run in reverse.
    pub fn as_backend_str(self) -> &'static str {
        match self {
            SandboxState::Ready => "ready",
            SandboxState::NotReady => "notready",
        }
    }

    pub fn from_backend_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ready" => Some(SandboxState::Ready),
            "notready" => Some(SandboxState::NotReady),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkMode {
    Host,
    Bridged,
    Cni,
    #[default]
    None,
}

impl NetworkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkMode::Host => "host",
            NetworkMode::Bridged => "bridged",
            NetworkMode::Cni => "cni",
            NetworkMode::None => "none",
        }
    }
}

/// Per-sandbox network record (spec §3): `mode-data` is the opaque blob a
/// network plugin owns across restarts.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    pub mode: Option<NetworkMode>,
    pub mode_data: String,
    pub nameservers: Vec<String>,
    pub searches: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// `{protocol, address, port}` half of a proxy device (spec §4.1, glossary).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub protocol: Protocol,
    pub address: String,
    pub port: u16,
}

/// A device attached to a container: disk mount, block device, or userspace
/// port forwarder (spec §3, §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Device {
    Disk {
        container_path: String,
        host_path: String,
        readonly: bool,
        pool: String,
    },
    Block {
        container_path: String,
        host_path: String,
        permissions: String,
    },
    Proxy {
        listen: Endpoint,
        connect: Endpoint,
    },
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    pub id: String,
    pub metadata: SandboxMetadata,
    pub hostname: String,
    pub log_directory: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Flat `user.linux.*`-prefixed persistence bus, see spec §4.1.
    pub config: BTreeMap<String, String>,
    pub devices: Vec<Device>,
    pub created_at: i64,
    pub state: SandboxState,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub name: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Unknown,
}

impl ContainerState {
    pub fn as_backend_str(self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Exited => "exited",
            ContainerState::Unknown => "unknown",
        }
    }

    pub fn from_backend_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "exited" => ContainerState::Exited,
            _ => ContainerState::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceLimits {
    pub cpu_shares: Option<i64>,
    pub cpu_quota: Option<i64>,
    pub cpu_period: Option<i64>,
    pub memory_limit_bytes: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct CloudInit {
    pub user_data: Option<String>,
    pub meta_data: Option<String>,
    pub network_config: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuUsage {
    pub usage_core_nano_seconds: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryUsage {
    pub working_set_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemUsage {
    pub used_bytes: u64,
    pub inodes_used: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerStats {
    pub cpu: CpuUsage,
    pub memory: MemoryUsage,
    pub filesystem: FilesystemUsage,
}

#[derive(Debug, Clone)]
pub struct Container {
    pub id: String,
    pub sandbox_id: String,
    pub metadata: ContainerMetadata,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
    pub devices: Vec<Device>,
    pub privileged: bool,
    pub resources: ResourceLimits,
    pub cloud_init: CloudInit,
    pub log_path: String,
    pub state: ContainerState,
    pub stats: ContainerStats,
    pub created_at: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub exit_code: i32,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct SandboxFilter {
    pub id: Option<String>,
    pub state: Option<SandboxState>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerFilter {
    pub id: Option<String>,
    pub state: Option<ContainerState>,
    pub sandbox_id: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// Subset applied against label maps for list-endpoint filtering (spec
/// §4.6): an empty or absent selector matches everything; present keys must
/// be a subset.
pub fn labels_match(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|have| have == v))
}

/// Result of a streamed or buffered exec against the backend (spec §4.5).
#[derive(Debug, Clone, Default)]
pub struct ExecOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

/// A live terminal-size change delivered on an interactive exec session's
/// resize channel (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub width: u16,
    pub height: u16,
}

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Thin typed facade over the external container manager (spec §2). Not
/// found is a distinguishable error kind ([`crate::error::Error::NotFound`])
/// so the orchestrator can treat it as idempotent success where required.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn create_sandbox(&self, sandbox: Sandbox) -> Result<()>;
    async fn update_sandbox(&self, sandbox: &Sandbox) -> Result<()>;
    async fn get_sandbox(&self, id: &str) -> Result<Sandbox>;
    async fn list_sandboxes(&self, filter: &SandboxFilter) -> Result<Vec<Sandbox>>;
    async fn stop_sandbox(&self, id: &str) -> Result<()>;
    async fn delete_sandbox(&self, id: &str) -> Result<()>;

    async fn create_container(&self, container: Container) -> Result<()>;
    async fn get_container(&self, id: &str) -> Result<Container>;
    async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<Container>>;
    async fn start_container(&self, id: &str) -> Result<()>;
    async fn stop_container(&self, id: &str, timeout: std::time::Duration) -> Result<()>;
    async fn delete_container(&self, id: &str) -> Result<()>;

    /// IPv4 address of a container's default interface (e.g. `eth0`),
    /// consulted for bridged-mode IP resolution (spec §4.4).
    async fn container_default_interface_ip(&self, id: &str) -> Result<Option<String>>;

    /// Buffered exec used by `ExecSync` (spec §4.5): `stdin` is the entire
    /// request up front, `timeout` bounds the call, and the reply carries
    /// fully collected stdout/stderr.
    async fn exec(
        &self,
        container_id: &str,
        cmd: &[String],
        stdin: &[u8],
        timeout: Option<std::time::Duration>,
    ) -> Result<ExecOutcome>;

    /// Streamed exec used by the interactive `Exec` streaming session (spec
    /// §4.5): stdio is wired live instead of buffered, `tty`/`interactive`
    /// select pty allocation, and `resize` carries live terminal-size
    /// changes for the lifetime of the session. Unbounded — the caller
    /// (the streaming server) owns cancellation via dropping the session.
    async fn exec_streamed(
        &self,
        container_id: &str,
        cmd: &[String],
        tty: bool,
        interactive: bool,
        stdin: BoxedReader,
        stdout: BoxedWriter,
        stderr: BoxedWriter,
        resize: mpsc::Receiver<TerminalSize>,
    ) -> Result<i32>;

    /// The backend's reported API/version string, surfaced verbatim in
    /// `Version` (spec §4.2).
    async fn runtime_api_version(&self) -> Result<String>;
}
