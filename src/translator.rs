//! Config translator (spec §4.1): a two-way mapping between CRI request
//! shapes and the backend's flat `string -> string` configuration map, plus
//! the container device list it doesn't otherwise have room for.
//!
//! The key table below is the single source of truth named in spec §9;
//! extensions should add new prefixed keys rather than repurpose these.

use std::collections::BTreeMap;

use crate::backend::{CloudInit, Device, Endpoint, Protocol};
use crate::proto::runtime::v1 as pb;

const KEY_CGROUP_PARENT: &str = "user.linux.cgroup_parent";
const KEY_SYSCTL_PREFIX: &str = "user.linux.sysctls.";
const KEY_SECURITY_PRIVILEGED: &str = "user.linux.security_context.privileged";
const KEY_BACKEND_PRIVILEGED: &str = "security.privileged";
const KEY_NAMESPACE_PREFIX: &str = "user.linux.security_context.namespace_options.";
const KEY_RUN_AS_USER: &str = "user.linux.security_context.run_as_user";
const KEY_SECCOMP_PROFILE_PATH: &str = "user.linux.security_context.seccomp_profile_path";

const ENV_USER_DATA: &str = "user-data";
const ENV_META_DATA: &str = "meta-data";
const ENV_NETWORK_CONFIG: &str = "network-config";

/// Reserved mount-path rewrite rules (spec §4.1): `/var/run/*` becomes
/// `/run/*`, then (unconditionally re-examined) `/run/*` becomes `/mnt/*`.
pub fn rewrite_mount_path(container_path: &str) -> String {
    let after_var_run = match container_path.strip_prefix("/var/run") {
        Some(suffix) => format!("/run{suffix}"),
        None => container_path.to_string(),
    };
    match after_var_run.strip_prefix("/run") {
        Some(suffix) => format!("/mnt{suffix}"),
        None => after_var_run,
    }
}

pub fn namespace_mode_to_str(mode: pb::NamespaceMode) -> &'static str {
    match mode {
        pb::NamespaceMode::Pod => "pod",
        pb::NamespaceMode::Container => "container",
        pb::NamespaceMode::Node => "node",
        pb::NamespaceMode::Target => "target",
    }
}

pub fn namespace_mode_from_str(s: &str) -> Option<pb::NamespaceMode> {
    match s.to_ascii_lowercase().as_str() {
        "pod" => Some(pb::NamespaceMode::Pod),
        "container" => Some(pb::NamespaceMode::Container),
        "node" => Some(pb::NamespaceMode::Node),
        "target" => Some(pb::NamespaceMode::Target),
        _ => None,
    }
}

pub fn container_state_to_proto(state: crate::backend::ContainerState) -> pb::ContainerState {
    use crate::backend::ContainerState as S;
    match state {
        S::Created => pb::ContainerState::ContainerCreated,
        S::Running => pb::ContainerState::ContainerRunning,
        S::Exited => pb::ContainerState::ContainerExited,
        S::Unknown => pb::ContainerState::ContainerUnknown,
    }
}

pub fn sandbox_state_to_proto(state: crate::backend::SandboxState) -> pb::PodSandboxState {
    use crate::backend::SandboxState as S;
    match state {
        S::Ready => pb::PodSandboxState::SandboxReady,
        S::NotReady => pb::PodSandboxState::SandboxNotready,
    }
}

/// Encode a Linux sandbox security context into the flat configuration map
/// (spec §4.1). `security.privileged` is the backend-enforced key;
/// `user.linux.security_context.privileged` is the Kubernetes-layer truth
/// kept alongside it.
pub fn encode_linux_sandbox_config(
    config: &mut BTreeMap<String, String>,
    linux: &pb::LinuxPodSandboxConfig,
) {
    if !linux.cgroup_parent.is_empty() {
        config.insert(KEY_CGROUP_PARENT.to_string(), linux.cgroup_parent.clone());
    }
    for (k, v) in &linux.sysctls {
        config.insert(format!("{KEY_SYSCTL_PREFIX}{k}"), v.clone());
    }
    if let Some(security_context) = &linux.security_context {
        encode_security_context(
            config,
            security_context.privileged,
            security_context.namespace_options.as_ref(),
            security_context.run_as_user.as_ref(),
            &security_context.seccomp_profile_path,
            security_context.selinux_options.as_ref(),
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn encode_security_context(
    config: &mut BTreeMap<String, String>,
    privileged: bool,
    namespace_options: Option<&pb::NamespaceOption>,
    run_as_user: Option<&pb::Int64Value>,
    seccomp_profile_path: &str,
    selinux_options: Option<&pb::SeLinuxOption>,
) {
    config.insert(KEY_SECURITY_PRIVILEGED.to_string(), privileged.to_string());
    config.insert(KEY_BACKEND_PRIVILEGED.to_string(), privileged.to_string());

    if let Some(ns) = namespace_options {
        let network = pb::NamespaceMode::try_from(ns.network).unwrap_or(pb::NamespaceMode::Pod);
        let pid = pb::NamespaceMode::try_from(ns.pid).unwrap_or(pb::NamespaceMode::Pod);
        let ipc = pb::NamespaceMode::try_from(ns.ipc).unwrap_or(pb::NamespaceMode::Pod);
        config.insert(format!("{KEY_NAMESPACE_PREFIX}network"), namespace_mode_to_str(network).to_string());
        config.insert(format!("{KEY_NAMESPACE_PREFIX}pid"), namespace_mode_to_str(pid).to_string());
        config.insert(format!("{KEY_NAMESPACE_PREFIX}ipc"), namespace_mode_to_str(ipc).to_string());
    }

    if let Some(run_as_user) = run_as_user {
        config.insert(KEY_RUN_AS_USER.to_string(), run_as_user.value.to_string());
    }

    if !seccomp_profile_path.is_empty() {
        config.insert(KEY_SECCOMP_PROFILE_PATH.to_string(), seccomp_profile_path.to_string());
    }

    // Shares the `namespace_options` key prefix with the fields above —
    // a documented quirk (spec §9), preserved for compatibility.
    if let Some(selinux) = selinux_options {
        if !selinux.user.is_empty() {
            config.insert(format!("{KEY_NAMESPACE_PREFIX}user"), selinux.user.clone());
        }
        if !selinux.role.is_empty() {
            config.insert(format!("{KEY_NAMESPACE_PREFIX}role"), selinux.role.clone());
        }
        if !selinux.r#type.is_empty() {
            config.insert(format!("{KEY_NAMESPACE_PREFIX}type"), selinux.r#type.clone());
        }
        if !selinux.level.is_empty() {
            config.insert(format!("{KEY_NAMESPACE_PREFIX}level"), selinux.level.clone());
        }
    }
}

/// Decode namespace options back out of the flat configuration (used by
/// `PodSandboxStatus`, spec §4.2).
pub fn decode_namespace_options(config: &BTreeMap<String, String>) -> pb::NamespaceOption {
    let lookup = |kind: &str| -> i32 {
        config
            .get(&format!("{KEY_NAMESPACE_PREFIX}{kind}"))
            .and_then(|s| namespace_mode_from_str(s))
            .unwrap_or(pb::NamespaceMode::Pod) as i32
    };
    pb::NamespaceOption {
        network: lookup("network"),
        pid: lookup("pid"),
        ipc: lookup("ipc"),
        target_id: String::new(),
    }
}

pub fn is_privileged(config: &BTreeMap<String, String>) -> bool {
    config.get(KEY_SECURITY_PRIVILEGED).map(|v| v == "true").unwrap_or(false)
}

/// Translate CRI mounts into disk devices, applying the `/var/run` →
/// `/run` → `/mnt` rewrite (spec §4.1) and, when `readonly_rootfs` is set,
/// injecting an extra root disk device from the `default` pool.
pub fn translate_mounts(mounts: &[pb::Mount], readonly_rootfs: bool) -> Vec<Device> {
    let mut devices: Vec<Device> = mounts
        .iter()
        .map(|m| Device::Disk {
            container_path: rewrite_mount_path(&m.container_path),
            host_path: m.host_path.clone(),
            readonly: m.readonly,
            pool: "default".to_string(),
        })
        .collect();
    if readonly_rootfs {
        devices.push(Device::Disk {
            container_path: "/".to_string(),
            host_path: String::new(),
            readonly: true,
            pool: "default".to_string(),
        });
    }
    devices
}

pub fn translate_block_devices(devices: &[pb::Device]) -> Vec<Device> {
    devices
        .iter()
        .map(|d| Device::Block {
            container_path: d.container_path.clone(),
            host_path: d.host_path.clone(),
            permissions: d.permissions.clone(),
        })
        .collect()
}

/// Extract the three reserved cloud-init keys out of the environment list,
/// leaving everything else untouched (spec §4.1, round-trip law).
pub fn extract_cloud_init(envs: &[pb::KeyValue]) -> (CloudInit, BTreeMap<String, String>) {
    let mut environment = BTreeMap::new();
    let mut cloud_init = CloudInit::default();
    for kv in envs {
        match kv.key.as_str() {
            ENV_USER_DATA => cloud_init.user_data = Some(kv.value.clone()),
            ENV_META_DATA => cloud_init.meta_data = Some(kv.value.clone()),
            ENV_NETWORK_CONFIG => cloud_init.network_config = Some(kv.value.clone()),
            _ => {
                environment.insert(kv.key.clone(), kv.value.clone());
            }
        }
    }
    if let Some(meta_data) = &mut cloud_init.meta_data {
        if !environment.is_empty() {
            meta_data.push('\n');
        }
    }
    (cloud_init, environment)
}

/// Translate port mappings into proxy devices (spec §4.1): mappings with a
/// zero on either side are dropped; protocol defaults to TCP, including on
/// unrecognized numeric values (spec §9).
pub fn translate_port_mappings(mappings: &[pb::PortMapping]) -> Vec<Device> {
    mappings
        .iter()
        .filter(|m| m.host_port != 0 && m.container_port != 0)
        .map(|m| {
            let protocol = match pb::Protocol::try_from(m.protocol) {
                Ok(pb::Protocol::Udp) => Protocol::Udp,
                _ => Protocol::Tcp,
            };
            let host_ip = if m.host_ip.is_empty() { "0.0.0.0".to_string() } else { m.host_ip.clone() };
            Device::Proxy {
                listen: Endpoint {
                    protocol,
                    address: host_ip,
                    port: m.host_port as u16,
                },
                connect: Endpoint {
                    protocol,
                    address: "127.0.0.1".to_string(),
                    port: m.container_port as u16,
                },
            }
        })
        .collect()
}

/// Render a [`ContainerStats`](crate::backend::ContainerStats) as the CRI
/// wire shape, timestamping every series identically (spec §4.1). Missing
/// backend counters are already zero by construction of the source type.
pub fn encode_container_stats(attributes_id: &str, stats: &crate::backend::ContainerStats, now: i64) -> pb::ContainerStats {
    pb::ContainerStats {
        attributes_id: attributes_id.to_string(),
        cpu: Some(pb::CpuUsage {
            timestamp: now,
            usage_core_nano_seconds: stats.cpu.usage_core_nano_seconds,
        }),
        memory: Some(pb::MemoryUsage {
            timestamp: now,
            working_set_bytes: stats.memory.working_set_bytes,
        }),
        writable_layer: Some(pb::FilesystemUsage {
            timestamp: now,
            used_bytes: stats.filesystem.used_bytes,
            inodes_used: stats.filesystem.inodes_used,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_path_rewrite_is_total() {
        assert_eq!(rewrite_mount_path("/var/run/secrets"), "/mnt/secrets");
        assert_eq!(rewrite_mount_path("/run/lock"), "/mnt/lock");
        assert_eq!(rewrite_mount_path("/etc/config"), "/etc/config");
    }

    #[test]
    fn namespace_option_round_trips_every_mode() {
        for mode in [pb::NamespaceMode::Pod, pb::NamespaceMode::Container, pb::NamespaceMode::Node, pb::NamespaceMode::Target] {
            for kind in ["network", "pid", "ipc"] {
                let mut config = BTreeMap::new();
                config.insert(format!("{KEY_NAMESPACE_PREFIX}{kind}"), namespace_mode_to_str(mode).to_string());
                let decoded = decode_namespace_options(&config);
                let got = match kind {
                    "network" => decoded.network,
                    "pid" => decoded.pid,
                    _ => decoded.ipc,
                };
                assert_eq!(pb::NamespaceMode::try_from(got).unwrap(), mode);
            }
        }
    }

    #[test]
    fn cloud_init_extraction_keeps_non_reserved_keys() {
        let envs = vec![
            pb::KeyValue { key: "user-data".into(), value: "#cloud-config\n".into() },
            pb::KeyValue { key: "FOO".into(), value: "bar".into() },
        ];
        let (cloud_init, env) = extract_cloud_init(&envs);
        assert_eq!(cloud_init.user_data.as_deref(), Some("#cloud-config\n"));
        assert_eq!(env.get("FOO"), Some(&"bar".to_string()));
        assert!(!env.contains_key("user-data"));
    }

    #[test]
    fn meta_data_gets_trailing_newline_when_environment_nonempty() {
        let envs = vec![
            pb::KeyValue { key: "meta-data".into(), value: "instance-id: x".into() },
            pb::KeyValue { key: "FOO".into(), value: "bar".into() },
        ];
        let (cloud_init, _) = extract_cloud_init(&envs);
        assert_eq!(cloud_init.meta_data.as_deref(), Some("instance-id: x\n"));
    }

    #[test]
    fn port_mapping_translation() {
        let mappings = vec![
            pb::PortMapping { protocol: pb::Protocol::Tcp as i32, container_port: 80, host_port: 8080, host_ip: String::new() },
            pb::PortMapping { protocol: pb::Protocol::Tcp as i32, container_port: 80, host_port: 0, host_ip: String::new() },
        ];
        let devices = translate_port_mappings(&mappings);
        assert_eq!(devices.len(), 1);
        match &devices[0] {
            Device::Proxy { listen, connect } => {
                assert_eq!(listen.address, "0.0.0.0");
                assert_eq!(listen.port, 8080);
                assert_eq!(connect.address, "127.0.0.1");
                assert_eq!(connect.port, 80);
            }
            _ => panic!("expected a proxy device"),
        }
    }

    #[test]
    fn unknown_protocol_falls_back_to_tcp() {
        let mappings = vec![pb::PortMapping { protocol: 99, container_port: 80, host_port: 8080, host_ip: String::new() }];
        let devices = translate_port_mappings(&mappings);
        match &devices[0] {
            Device::Proxy { listen, .. } => assert_eq!(listen.protocol, Protocol::Tcp),
            _ => panic!("expected a proxy device"),
        }
    }
}
