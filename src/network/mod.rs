//! Network plugin abstraction (spec §4.3): a capability contract for
//! pluggable pod networking, driven entirely by the opaque `mode-data` blob
//! persisted on the sandbox so a plugin is stateless across process
//! restarts.

pub mod bridged;
pub mod cni;
pub mod host;
pub mod none;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;

/// Which plugin `LXENetworkPlugin` selected (spec §6). `host`/`none` are
/// not reachable through that option — they are modes the orchestrator
/// picks directly — but the plugins exist so every mode in the data model
/// (spec §3) has a concrete, testable implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPluginKind {
    Bridged,
    Cni,
}

/// Carried into every `When*` hook after the first: `data` is the
/// previously-returned `mode-data`, so the plugin never needs in-process
/// state (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct Properties {
    pub sandbox_id: String,
    pub annotations: BTreeMap<String, String>,
    pub data: String,
}

/// As [`Properties`] but additionally carries the sandbox's process id
/// (zero when not applicable), available once the sandbox is running.
#[derive(Debug, Clone, Default)]
pub struct PropertiesRunning {
    pub base: Properties,
    pub pid: u32,
}

#[derive(Debug, Clone, Default)]
pub struct NetStatus {
    pub ips: Vec<String>,
}

impl NetStatus {
    /// The canonical pod IP, when known (spec §4.3).
    pub fn primary_ip(&self) -> Option<&str> {
        self.ips.first().map(String::as_str)
    }
}

/// Per-container handle obtained from a [`PodNet`] (spec §4.3).
#[async_trait]
pub trait ContainerNet: Send + Sync {
    async fn when_created(&self, props: &Properties) -> Result<String>;
}

/// Per-sandbox handle obtained from a [`NetworkPlugin`] (spec §4.3).
/// `WhenCreated`/`WhenStarted` failures abort sandbox creation;
/// `WhenStopped`/`WhenDeleted` failures are logged and swallowed by the
/// orchestrator (best-effort reclamation).
#[async_trait]
pub trait PodNet: Send + Sync {
    async fn when_created(&self, props: &Properties) -> Result<String>;
    async fn when_started(&self, props: &PropertiesRunning) -> Result<String>;
    async fn when_stopped(&self, props: &Properties) -> Result<()>;
    async fn when_deleted(&self, props: &Properties) -> Result<()>;
    async fn status(&self, props: &PropertiesRunning) -> Result<NetStatus>;
    fn container_network(&self, container_id: &str, annotations: &BTreeMap<String, String>) -> Box<dyn ContainerNet>;
}

/// Top-level plugin entry point (spec §4.3). Selection is static per
/// runtime instance.
#[async_trait]
pub trait NetworkPlugin: Send + Sync {
    fn pod_network(&self, sandbox_id: &str, annotations: &BTreeMap<String, String>) -> Box<dyn PodNet>;
    async fn update_runtime_config(&self, pod_cidr: &str) -> Result<()>;
}

pub fn plugin_for(kind: NetworkPluginKind) -> Box<dyn NetworkPlugin> {
    match kind {
        NetworkPluginKind::Bridged => Box::new(bridged::BridgedPlugin),
        NetworkPluginKind::Cni => Box::new(cni::CniPlugin::default()),
    }
}
