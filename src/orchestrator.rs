//! Lifecycle orchestrator (spec §4.2): implements the CRI verbs by
//! composing the backend, the translator, and the network plugin. Every
//! verb here is the logical operation — tonic-shaped request/response
//! conversion lives in [`crate::cri_service`], one layer up.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    Backend, Container, ContainerFilter, ContainerMetadata, ContainerState, NetworkConfig,
    NetworkMode, ResourceLimits, Sandbox, SandboxFilter, SandboxMetadata, SandboxState,
};
use crate::error::{CASCADE_STOP_TIMEOUT, Error, Result};
use crate::network::{NetworkPlugin, NetworkPluginKind, Properties, PropertiesRunning};
use crate::proto::runtime::v1 as pb;
use crate::translator;

pub const RUNTIME_NAME: &str = "lxe";
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CRI_VERSION: &str = "0.1.0";

pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    network_plugin: Box<dyn NetworkPlugin>,
    configured_kind: NetworkPluginKind,
    /// `LXEHostnetworkFile`: raw-lxc include used when mode is `host` (spec §6).
    hostnetwork_file: String,
}

/// The host's outbound interface address, used both for host-network IP
/// resolution (spec §4.4 case 1) and the streaming `BaseURL` (spec §4.5).
/// Connecting a UDP socket performs no handshake but makes the kernel pick
/// the route's source address.
pub fn host_outbound_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}

fn now_unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn Backend>, network_plugin_kind: NetworkPluginKind, hostnetwork_file: String) -> Self {
        Orchestrator {
            backend,
            network_plugin: crate::network::plugin_for(network_plugin_kind),
            configured_kind: network_plugin_kind,
            hostnetwork_file,
        }
    }

    fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub async fn version(&self) -> Result<(String, String)> {
        let runtime_api_version = self.backend.runtime_api_version().await?;
        Ok((RUNTIME_VERSION.to_string(), runtime_api_version))
    }

    /// `Status` always reports ready (spec §4.2, §9 "placeholder truthiness").
    pub fn status(&self) -> pb::RuntimeStatus {
        pb::RuntimeStatus {
            conditions: vec![
                pb::RuntimeCondition {
                    r#type: "RuntimeReady".to_string(),
                    status: true,
                    reason: String::new(),
                    message: String::new(),
                },
                pb::RuntimeCondition {
                    r#type: "NetworkReady".to_string(),
                    status: true,
                    reason: String::new(),
                    message: String::new(),
                },
            ],
        }
    }

    pub async fn update_runtime_config(&self, pod_cidr: &str) -> Result<()> {
        self.network_plugin.update_runtime_config(pod_cidr).await
    }

    // ---- Sandbox lifecycle ----------------------------------------------

    pub async fn run_pod_sandbox(&self, config: pb::PodSandboxConfig, _runtime_handler: &str) -> Result<String> {
        let id = Self::new_id();
        info!(sandbox_id = %id, "run_pod_sandbox: start");

        let metadata = config.metadata.clone().unwrap_or_default();
        let labels: BTreeMap<String, String> = config.labels.clone().into_iter().collect();
        let annotations: BTreeMap<String, String> = config.annotations.clone().into_iter().collect();
        let mut flat_config = BTreeMap::new();
        if let Some(linux) = &config.linux {
            translator::encode_linux_sandbox_config(&mut flat_config, linux);
        }

        let is_host_network = config
            .linux
            .as_ref()
            .and_then(|l| l.security_context.as_ref())
            .and_then(|sc| sc.namespace_options.as_ref())
            .map(|ns| pb::NamespaceMode::try_from(ns.network) == Ok(pb::NamespaceMode::Node))
            .unwrap_or(false);

        let mode = if is_host_network {
            flat_config.insert("raw.lxc".to_string(), format!("lxc.include={}", self.hostnetwork_file));
            NetworkMode::Host
        } else {
            match self.network_kind_from_selection()? {
                NetworkPluginKind::Bridged => NetworkMode::Bridged,
                NetworkPluginKind::Cni => NetworkMode::Cni,
            }
        };

        let devices = if mode != NetworkMode::Host {
            translator::translate_port_mappings(&config.port_mappings)
        } else {
            Vec::new()
        };

        let dns = config.dns_config.clone().unwrap_or_default();

        let mut sandbox = Sandbox {
            id: id.clone(),
            metadata: SandboxMetadata {
                name: metadata.name,
                namespace: metadata.namespace,
                uid: metadata.uid,
                attempt: metadata.attempt,
            },
            hostname: config.hostname.clone(),
            log_directory: config.log_directory.clone(),
            labels,
            annotations: annotations.clone(),
            config: flat_config,
            devices,
            created_at: now_unix_nanos(),
            state: SandboxState::NotReady,
            network: NetworkConfig {
                mode: Some(mode),
                mode_data: String::new(),
                nameservers: dns.servers,
                searches: dns.searches,
            },
        };

        self.backend.create_sandbox(sandbox.clone()).await?;

        if mode != NetworkMode::Host {
            let pod_net = self.network_plugin.pod_network(&id, &annotations);
            let props = Properties {
                sandbox_id: id.clone(),
                annotations: annotations.clone(),
                data: String::new(),
            };
            let created_data = pod_net.when_created(&props).await.map_err(|e| {
                warn!(sandbox_id = %id, error = %e, "run_pod_sandbox: network when_created failed");
                e
            })?;
            let running_props = PropertiesRunning {
                base: Properties { data: created_data, ..props },
                pid: 0,
            };
            let started_data = pod_net.when_started(&running_props).await?;
            sandbox.network.mode_data = started_data;
        }

        sandbox.state = SandboxState::Ready;
        self.backend.update_sandbox(&sandbox).await?;

        debug!(sandbox_id = %id, mode = ?mode, "run_pod_sandbox: done");
        Ok(id)
    }

    fn network_kind_from_selection(&self) -> Result<NetworkPluginKind> {
        // The plugin implementation is fixed at process startup (spec §4.3
        // "plugin selection is static"); mirror that instance's kind here
        // via the mode it reports for bookkeeping purposes only.
        Ok(self.configured_kind)
    }

    pub async fn stop_pod_sandbox(&self, id: &str) -> Result<()> {
        let sandbox = match self.backend.get_sandbox(id).await {
            Ok(sandbox) => sandbox,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let containers = self
            .backend
            .list_containers(&ContainerFilter { sandbox_id: Some(id.to_string()), ..Default::default() })
            .await?;
        for container in &containers {
            match self.backend.stop_container(&container.id, CASCADE_STOP_TIMEOUT).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        match self.backend.stop_sandbox(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        }

        if sandbox.network.mode != Some(NetworkMode::Host) {
            let pod_net = self.network_plugin.pod_network(id, &sandbox.annotations);
            let props = Properties {
                sandbox_id: id.to_string(),
                annotations: sandbox.annotations.clone(),
                data: sandbox.network.mode_data.clone(),
            };
            if let Err(e) = pod_net.when_stopped(&props).await {
                warn!(sandbox_id = %id, error = %e, "stop_pod_sandbox: network when_stopped failed, ignoring");
            }
        }
        Ok(())
    }

    pub async fn remove_pod_sandbox(&self, id: &str) -> Result<()> {
        let sandbox = match self.backend.get_sandbox(id).await {
            Ok(sandbox) => sandbox,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let containers = self
            .backend
            .list_containers(&ContainerFilter { sandbox_id: Some(id.to_string()), ..Default::default() })
            .await?;
        for container in &containers {
            match self.backend.stop_container(&container.id, CASCADE_STOP_TIMEOUT).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            match self.backend.delete_container(&container.id).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        match self.backend.stop_sandbox(id).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.backend.delete_sandbox(id).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        if sandbox.network.mode != Some(NetworkMode::Host) {
            let pod_net = self.network_plugin.pod_network(id, &sandbox.annotations);
            let props = Properties {
                sandbox_id: id.to_string(),
                annotations: sandbox.annotations.clone(),
                data: sandbox.network.mode_data.clone(),
            };
            if let Err(e) = pod_net.when_deleted(&props).await {
                warn!(sandbox_id = %id, error = %e, "remove_pod_sandbox: network when_deleted failed, ignoring");
            }
        }
        Ok(())
    }

    pub async fn pod_sandbox_status(&self, id: &str) -> Result<(pb::PodSandboxStatus, Vec<pb::ContainerStatus>)> {
        let sandbox = self.backend.get_sandbox(id).await?;
        let ip = self.resolve_pod_ip(&sandbox).await?;
        let namespace_options = translator::decode_namespace_options(&sandbox.config);

        let status = pb::PodSandboxStatus {
            id: sandbox.id.clone(),
            metadata: Some(pb::PodSandboxMetadata {
                name: sandbox.metadata.name.clone(),
                uid: sandbox.metadata.uid.clone(),
                namespace: sandbox.metadata.namespace.clone(),
                attempt: sandbox.metadata.attempt,
            }),
            state: translator::sandbox_state_to_proto(sandbox.state) as i32,
            created_at: sandbox.created_at,
            network: Some(pb::PodSandboxNetworkStatus { ip, additional_ips: Vec::new() }),
            linux: Some(pb::LinuxPodSandboxStatus { namespace_options: Some(namespace_options) }),
            labels: sandbox.labels.clone().into_iter().collect(),
            annotations: sandbox.annotations.clone().into_iter().collect(),
            runtime_handler: String::new(),
        };

        let containers = self
            .backend
            .list_containers(&ContainerFilter { sandbox_id: Some(id.to_string()), ..Default::default() })
            .await?;
        let statuses = containers.iter().map(container_to_status).collect();

        Ok((status, statuses))
    }

    pub async fn list_pod_sandbox(&self, filter: Option<pb::PodSandboxFilter>) -> Result<Vec<pb::PodSandbox>> {
        let backend_filter = sandbox_filter_from_proto(filter);
        let sandboxes = self.backend.list_sandboxes(&backend_filter).await?;
        Ok(sandboxes.iter().map(sandbox_to_list_item).collect())
    }

    /// IP address resolution, spec §4.4.
    async fn resolve_pod_ip(&self, sandbox: &Sandbox) -> Result<String> {
        match sandbox.network.mode {
            Some(NetworkMode::Host) => Ok(host_outbound_ip().unwrap_or_default()),
            Some(NetworkMode::None) => Ok(String::new()),
            Some(mode @ (NetworkMode::Cni | NetworkMode::Bridged)) => {
                if mode == NetworkMode::Cni {
                    let pod_net = self.network_plugin.pod_network(&sandbox.id, &sandbox.annotations);
                    let props = PropertiesRunning {
                        base: Properties {
                            sandbox_id: sandbox.id.clone(),
                            annotations: sandbox.annotations.clone(),
                            data: sandbox.network.mode_data.clone(),
                        },
                        pid: 0,
                    };
                    if let Some(ip) = pod_net.status(&props).await?.primary_ip() {
                        return Ok(ip.to_string());
                    }
                }
                self.resolve_ip_via_containers(&sandbox.id).await
            }
            None => Ok(String::new()),
        }
    }

    async fn resolve_ip_via_containers(&self, sandbox_id: &str) -> Result<String> {
        let containers = self
            .backend
            .list_containers(&ContainerFilter { sandbox_id: Some(sandbox_id.to_string()), ..Default::default() })
            .await?;
        for container in containers.iter().filter(|c| c.state == ContainerState::Running) {
            if let Some(ip) = self.backend.container_default_interface_ip(&container.id).await? {
                return Ok(ip);
            }
        }
        Ok(String::new())
    }

    // ---- Container lifecycle --------------------------------------------

    pub async fn create_container(
        &self,
        sandbox_id: &str,
        config: pb::ContainerConfig,
        _sandbox_config: pb::PodSandboxConfig,
    ) -> Result<String> {
        let sandbox = self.backend.get_sandbox(sandbox_id).await?;
        let id = Self::new_id();

        let metadata = config.metadata.clone().unwrap_or_default();
        let labels: BTreeMap<String, String> = config.labels.clone().into_iter().collect();
        let annotations: BTreeMap<String, String> = config.annotations.clone().into_iter().collect();

        let readonly_rootfs = config
            .linux
            .as_ref()
            .and_then(|l| l.security_context.as_ref())
            .map(|sc| sc.readonly_rootfs)
            .unwrap_or(false);
        let mut devices = translator::translate_mounts(&config.mounts, readonly_rootfs);
        devices.extend(translator::translate_block_devices(&config.devices));

        let (cloud_init, environment) = translator::extract_cloud_init(&config.envs);

        let resources = config
            .linux
            .as_ref()
            .and_then(|l| l.resources.as_ref())
            .map(|r| ResourceLimits {
                cpu_shares: Some(r.cpu_shares),
                cpu_quota: Some(r.cpu_quota),
                cpu_period: Some(r.cpu_period),
                memory_limit_bytes: Some(r.memory_limit_in_bytes),
            })
            .unwrap_or_default();
        let privileged = config
            .linux
            .as_ref()
            .and_then(|l| l.security_context.as_ref())
            .map(|sc| sc.privileged)
            .unwrap_or(false);

        let container = Container {
            id: id.clone(),
            sandbox_id: sandbox_id.to_string(),
            metadata: ContainerMetadata { name: metadata.name, attempt: metadata.attempt },
            image: config.image.clone().map(|i| i.image).unwrap_or_default(),
            labels,
            annotations: annotations.clone(),
            environment,
            devices,
            privileged,
            resources,
            cloud_init,
            log_path: config.log_path.clone(),
            state: ContainerState::Created,
            stats: Default::default(),
            created_at: now_unix_nanos(),
            started_at: 0,
            finished_at: 0,
            exit_code: 0,
            reason: String::new(),
            message: String::new(),
        };

        self.backend.create_container(container).await?;

        if sandbox.network.mode != Some(NetworkMode::Host) {
            let pod_net = self.network_plugin.pod_network(sandbox_id, &sandbox.annotations);
            let container_net = pod_net.container_network(&id, &annotations);
            let props = Properties {
                sandbox_id: sandbox_id.to_string(),
                annotations,
                data: sandbox.network.mode_data.clone(),
            };
            container_net.when_created(&props).await?;
        }

        Ok(id)
    }

    pub async fn start_container(&self, id: &str) -> Result<()> {
        self.backend.start_container(id).await
    }

    pub async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<()> {
        let timeout = if timeout_secs > 0 { Duration::from_secs(timeout_secs as u64) } else { Duration::ZERO };
        match self.backend.stop_container(id, timeout).await {
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn remove_container(&self, id: &str) -> Result<()> {
        match self.backend.delete_container(id).await {
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn container_status(&self, id: &str) -> Result<pb::ContainerStatus> {
        let container = self.backend.get_container(id).await?;
        Ok(container_to_status(&container))
    }

    pub async fn list_containers(&self, filter: Option<pb::ContainerFilter>) -> Result<Vec<pb::Container>> {
        let backend_filter = container_filter_from_proto(filter);
        let containers = self.backend.list_containers(&backend_filter).await?;
        Ok(containers.iter().map(container_to_list_item).collect())
    }

    pub async fn container_stats(&self, id: &str) -> Result<pb::ContainerStats> {
        let container = self.backend.get_container(id).await?;
        Ok(translator::encode_container_stats(&container.id, &container.stats, now_unix_nanos()))
    }

    pub async fn list_container_stats(&self, filter: Option<pb::ContainerStatsFilter>) -> Result<Vec<pb::ContainerStats>> {
        let backend_filter = container_stats_filter_from_proto(filter);
        let containers = self.backend.list_containers(&backend_filter).await?;
        let now = now_unix_nanos();
        Ok(containers
            .iter()
            .map(|c| translator::encode_container_stats(&c.id, &c.stats, now))
            .collect())
    }

    /// Runs `cmd` to completion against in-memory buffers (spec §4.5). A
    /// non-zero exit is reported via `Error::ExecExitError` rather than a
    /// plain `Ok`, per spec §8 scenario 6 — the captured stdout/stderr and
    /// exit code travel inside the error so a caller that only wants
    /// success/failure (e.g. a liveness probe) can treat it as a normal
    /// error, while the RPC surface still recovers the response fields from
    /// it (see `cri_service::exec_sync`).
    pub async fn exec_sync(&self, container_id: &str, cmd: Vec<String>, timeout_secs: i64) -> Result<(Vec<u8>, Vec<u8>, i32)> {
        let timeout = if timeout_secs > 0 { Some(Duration::from_secs(timeout_secs as u64)) } else { None };
        let outcome = self.backend.exec(container_id, &cmd, &[], timeout).await?;
        if outcome.exit_code != 0 {
            return Err(Error::ExecExitError {
                code: outcome.exit_code,
                message: format!(
                    "command '{}' exited with code {}: {}",
                    cmd.join(" "),
                    outcome.exit_code,
                    String::from_utf8_lossy(&outcome.stderr)
                ),
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            });
        }
        Ok((outcome.stdout, outcome.stderr, outcome.exit_code))
    }

    /// Exposes the backend facade so the streaming server can drive
    /// interactive exec directly (spec §4.5); the streaming session is not
    /// itself a CRI verb, so it lives one layer below this orchestrator.
    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    /// Pod IP resolution (spec §4.4), exposed for `PortForward`'s
    /// destination lookup.
    pub async fn pod_ip(&self, sandbox_id: &str) -> Result<String> {
        let sandbox = self.backend.get_sandbox(sandbox_id).await?;
        self.resolve_pod_ip(&sandbox).await
    }
}

fn container_to_status(container: &Container) -> pb::ContainerStatus {
    pb::ContainerStatus {
        id: container.id.clone(),
        metadata: Some(pb::ContainerMetadata {
            name: container.metadata.name.clone(),
            attempt: container.metadata.attempt,
        }),
        state: translator::container_state_to_proto(container.state) as i32,
        created_at: container.created_at,
        started_at: container.started_at,
        finished_at: container.finished_at,
        exit_code: container.exit_code,
        image: Some(pb::ImageSpec {
            image: container.image.clone(),
            annotations: BTreeMap::new().into_iter().collect(),
            user_specified_image: String::new(),
            runtime_handler: String::new(),
        }),
        image_ref: String::new(),
        reason: container.reason.clone(),
        message: container.message.clone(),
        labels: container.labels.clone().into_iter().collect(),
        annotations: container.annotations.clone().into_iter().collect(),
        mounts: Vec::new(),
        log_path: container.log_path.clone(),
        image_id: String::new(),
    }
}

fn container_to_list_item(container: &Container) -> pb::Container {
    pb::Container {
        id: container.id.clone(),
        pod_sandbox_id: container.sandbox_id.clone(),
        metadata: Some(pb::ContainerMetadata {
            name: container.metadata.name.clone(),
            attempt: container.metadata.attempt,
        }),
        image: Some(pb::ImageSpec {
            image: container.image.clone(),
            annotations: BTreeMap::new().into_iter().collect(),
            user_specified_image: String::new(),
            runtime_handler: String::new(),
        }),
        image_ref: String::new(),
        state: translator::container_state_to_proto(container.state) as i32,
        created_at: container.created_at,
        labels: container.labels.clone().into_iter().collect(),
        annotations: container.annotations.clone().into_iter().collect(),
        image_id: String::new(),
    }
}

fn sandbox_to_list_item(sandbox: &Sandbox) -> pb::PodSandbox {
    pb::PodSandbox {
        id: sandbox.id.clone(),
        metadata: Some(pb::PodSandboxMetadata {
            name: sandbox.metadata.name.clone(),
            uid: sandbox.metadata.uid.clone(),
            namespace: sandbox.metadata.namespace.clone(),
            attempt: sandbox.metadata.attempt,
        }),
        state: translator::sandbox_state_to_proto(sandbox.state) as i32,
        created_at: sandbox.created_at,
        labels: sandbox.labels.clone().into_iter().collect(),
        annotations: sandbox.annotations.clone().into_iter().collect(),
        runtime_handler: String::new(),
    }
}

fn sandbox_filter_from_proto(filter: Option<pb::PodSandboxFilter>) -> SandboxFilter {
    let Some(filter) = filter else { return SandboxFilter::default() };
    SandboxFilter {
        id: (!filter.id.is_empty()).then_some(filter.id),
        state: filter
            .state
            .and_then(|s| pb::PodSandboxState::try_from(s.state).ok())
            .map(|s| match s {
                pb::PodSandboxState::SandboxReady => SandboxState::Ready,
                pb::PodSandboxState::SandboxNotready => SandboxState::NotReady,
            }),
        labels: filter.label_selector.into_iter().collect(),
    }
}

fn container_stats_filter_from_proto(filter: Option<pb::ContainerStatsFilter>) -> ContainerFilter {
    let Some(filter) = filter else { return ContainerFilter::default() };
    ContainerFilter {
        id: (!filter.id.is_empty()).then_some(filter.id),
        state: None,
        sandbox_id: (!filter.pod_sandbox_id.is_empty()).then_some(filter.pod_sandbox_id),
        labels: filter.label_selector.into_iter().collect(),
    }
}

fn container_filter_from_proto(filter: Option<pb::ContainerFilter>) -> ContainerFilter {
    let Some(filter) = filter else { return ContainerFilter::default() };
    ContainerFilter {
        id: (!filter.id.is_empty()).then_some(filter.id),
        state: filter
            .state
            .and_then(|s| pb::ContainerState::try_from(s.state).ok())
            .map(|s| match s {
                pb::ContainerState::ContainerCreated => ContainerState::Created,
                pb::ContainerState::ContainerRunning => ContainerState::Running,
                pb::ContainerState::ContainerExited => ContainerState::Exited,
                pb::ContainerState::ContainerUnknown => ContainerState::Unknown,
            }),
        sandbox_id: (!filter.pod_sandbox_id.is_empty()).then_some(filter.pod_sandbox_id),
        labels: filter.label_selector.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExecOutcome;
    use crate::backend::fake::FakeBackend;
    use crate::network::NetworkPluginKind;

    fn orchestrator() -> (Orchestrator, Arc<FakeBackend>) {
        let fake = Arc::new(FakeBackend::new());
        let backend: Arc<dyn Backend> = fake.clone();
        let orch = Orchestrator::new(backend, NetworkPluginKind::Bridged, "/etc/lxe/hostnetwork.conf".to_string());
        (orch, fake)
    }

    fn sandbox_config(name: &str) -> pb::PodSandboxConfig {
        pb::PodSandboxConfig {
            metadata: Some(pb::PodSandboxMetadata {
                name: name.to_string(),
                namespace: "default".to_string(),
                uid: format!("uid-{name}"),
                attempt: 0,
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_start_stop_remove_happy_path() {
        let (orch, _fake) = orchestrator();
        let sandbox_id = orch.run_pod_sandbox(sandbox_config("web"), "").await.unwrap();

        let (status, containers) = orch.pod_sandbox_status(&sandbox_id).await.unwrap();
        assert_eq!(status.state, pb::PodSandboxState::SandboxReady as i32);
        assert!(containers.is_empty());

        let container_id = orch
            .create_container(&sandbox_id, pb::ContainerConfig::default(), pb::PodSandboxConfig::default())
            .await
            .unwrap();
        orch.start_container(&container_id).await.unwrap();
        let status = orch.container_status(&container_id).await.unwrap();
        assert_eq!(status.state, pb::ContainerState::ContainerRunning as i32);

        orch.stop_container(&container_id, 10).await.unwrap();
        let status = orch.container_status(&container_id).await.unwrap();
        assert_eq!(status.state, pb::ContainerState::ContainerExited as i32);

        orch.remove_container(&container_id).await.unwrap();
        assert!(orch.container_status(&container_id).await.is_err());

        orch.stop_pod_sandbox(&sandbox_id).await.unwrap();
        orch.remove_pod_sandbox(&sandbox_id).await.unwrap();
        assert!(orch.pod_sandbox_status(&sandbox_id).await.is_err());
    }

    #[tokio::test]
    async fn host_network_sandbox_skips_plugin_and_reports_host_ip() {
        let (orch, _fake) = orchestrator();
        let mut config = sandbox_config("hostnet");
        config.linux = Some(pb::LinuxPodSandboxConfig {
            security_context: Some(pb::LinuxSandboxSecurityContext {
                namespace_options: Some(pb::NamespaceOption {
                    network: pb::NamespaceMode::Node as i32,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });

        let sandbox_id = orch.run_pod_sandbox(config, "").await.unwrap();
        let (status, _) = orch.pod_sandbox_status(&sandbox_id).await.unwrap();
        assert!(!status.network.unwrap().ip.is_empty(), "host network sandbox should resolve the host's outbound ip");
    }

    #[tokio::test]
    async fn removing_an_unknown_sandbox_is_idempotent() {
        let (orch, _fake) = orchestrator();
        orch.stop_pod_sandbox("does-not-exist").await.unwrap();
        orch.remove_pod_sandbox("does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn removing_an_unknown_container_is_idempotent() {
        let (orch, _fake) = orchestrator();
        orch.stop_container("does-not-exist", 10).await.unwrap();
        orch.remove_container("does-not-exist").await.unwrap();
    }

    #[tokio::test]
    async fn exec_sync_zero_exit_returns_output_without_error() {
        let (orch, fake) = orchestrator();
        let sandbox_id = orch.run_pod_sandbox(sandbox_config("web"), "").await.unwrap();
        let container_id = orch
            .create_container(&sandbox_id, pb::ContainerConfig::default(), pb::PodSandboxConfig::default())
            .await
            .unwrap();

        fake.push_exec_result(
            &container_id,
            ExecOutcome { stdout: b"hi\n".to_vec(), stderr: Vec::new(), exit_code: 0 },
        );

        let (stdout, stderr, exit_code) = orch.exec_sync(&container_id, vec!["echo".to_string(), "hi".to_string()], 5).await.unwrap();
        assert_eq!(stdout, b"hi\n");
        assert_eq!(stderr, b"");
        assert_eq!(exit_code, 0);
    }

    #[tokio::test]
    async fn exec_sync_nonzero_exit_is_reported_as_an_error_carrying_the_output() {
        let (orch, fake) = orchestrator();
        let sandbox_id = orch.run_pod_sandbox(sandbox_config("web"), "").await.unwrap();
        let container_id = orch
            .create_container(&sandbox_id, pb::ContainerConfig::default(), pb::PodSandboxConfig::default())
            .await
            .unwrap();

        fake.push_exec_result(
            &container_id,
            ExecOutcome { stdout: b"boom\n".to_vec(), stderr: b"err\n".to_vec(), exit_code: 17 },
        );

        let err = orch.exec_sync(&container_id, vec!["false".to_string()], 5).await.unwrap_err();
        match err {
            Error::ExecExitError { code, stdout, stderr, .. } => {
                assert_eq!(code, 17);
                assert_eq!(stdout, b"boom\n");
                assert_eq!(stderr, b"err\n");
            }
            other => panic!("expected ExecExitError, got {other:?}"),
        }
    }
}
