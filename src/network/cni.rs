//! CNI (Container Network Interface) plugin: invokes an external plugin
//! binary per the CNI ADD/DEL convention — parameters via environment
//! variables, network configuration piped to stdin, result parsed as JSON
//! from stdout. Grounded on the teacher's `host-local` IPAM invocation
//! (`work/runtime/ipam.rs`), generalized from IPAM-only to a full pod
//! network plugin.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{ContainerNet, NetStatus, PodNet, Properties, PropertiesRunning};

const CNI_VERSION: &str = "1.0.0";
const DEFAULT_PLUGIN_PATH: &str = "/opt/cni/bin/bridge";
const DEFAULT_NETWORK_NAME: &str = "lxe-cni";

pub struct CniPlugin {
    plugin_path: String,
}

impl Default for CniPlugin {
    fn default() -> Self {
        CniPlugin {
            plugin_path: std::env::var("LXE_CNI_PLUGIN_PATH").unwrap_or_else(|_| DEFAULT_PLUGIN_PATH.to_string()),
        }
    }
}

#[async_trait]
impl super::NetworkPlugin for CniPlugin {
    fn pod_network(&self, sandbox_id: &str, _annotations: &BTreeMap<String, String>) -> Box<dyn PodNet> {
        Box::new(CniPodNet {
            plugin_path: self.plugin_path.clone(),
            sandbox_id: sandbox_id.to_string(),
        })
    }

    async fn update_runtime_config(&self, _pod_cidr: &str) -> Result<()> {
        Ok(())
    }
}

struct CniPodNet {
    plugin_path: String,
    sandbox_id: String,
}

#[async_trait]
impl PodNet for CniPodNet {
    async fn when_created(&self, props: &Properties) -> Result<String> {
        let config = to_vec(&json!({
            "cniVersion": CNI_VERSION,
            "name": DEFAULT_NETWORK_NAME,
            "type": "bridge",
        }));
        let output = run_plugin(&self.plugin_path, "ADD", &self.sandbox_id, &config).await?;
        let result: CniAddResult = serde_json::from_slice(&output).map_err(|e| {
            Error::network_plugin_failure("when-created", props.sandbox_id.clone(), e.into())
        })?;
        Ok(serde_json::to_string(&result).unwrap_or_default())
    }

    async fn when_started(&self, props: &PropertiesRunning) -> Result<String> {
        Ok(props.base.data.clone())
    }

    async fn when_stopped(&self, _props: &Properties) -> Result<()> {
        Ok(())
    }

    async fn when_deleted(&self, props: &Properties) -> Result<()> {
        let config = to_vec(&json!({
            "cniVersion": CNI_VERSION,
            "name": DEFAULT_NETWORK_NAME,
            "type": "bridge",
        }));
        let _ = run_plugin(&self.plugin_path, "DEL", &props.sandbox_id, &config).await;
        Ok(())
    }

    async fn status(&self, props: &PropertiesRunning) -> Result<NetStatus> {
        let result: CniAddResult = serde_json::from_str(&props.base.data).unwrap_or_default();
        Ok(NetStatus {
            ips: result.ips.into_iter().map(|ip| strip_prefix_len(&ip.address)).collect(),
        })
    }

    fn container_network(&self, _container_id: &str, _annotations: &BTreeMap<String, String>) -> Box<dyn ContainerNet> {
        Box::new(NoopContainerNet)
    }
}

struct NoopContainerNet;

#[async_trait]
impl ContainerNet for NoopContainerNet {
    async fn when_created(&self, _props: &Properties) -> Result<String> {
        Ok(String::new())
    }
}

fn strip_prefix_len(cidr: &str) -> String {
    cidr.split('/').next().unwrap_or(cidr).to_string()
}

fn to_vec(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).expect("CNI config is always serializable")
}

/// Run a CNI plugin command, feeding `config` on stdin and parsing stdout
/// as the CNI result on success (spec §4.3, glossary: CNI).
async fn run_plugin(path: &str, command: &str, sandbox_id: &str, config: &[u8]) -> Result<Vec<u8>> {
    let container_id = cni_container_id(sandbox_id);
    let mut child = Command::new(path)
        .env_clear()
        .env("CNI_COMMAND", command)
        .env("CNI_CONTAINERID", &container_id)
        .env("CNI_NETNS", "/dev/null")
        .env("CNI_IFNAME", "eth0")
        .env("CNI_PATH", "/opt/cni/bin")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(|e| Error::network_plugin_failure("spawn", sandbox_id.to_string(), e.into()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(config)
            .await
            .map_err(|e| Error::network_plugin_failure("write-config", sandbox_id.to_string(), e.into()))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| Error::network_plugin_failure("wait", sandbox_id.to_string(), e.into()))?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        Err(Error::network_plugin_failure(
            "exit",
            sandbox_id.to_string(),
            anyhow::anyhow!(String::from_utf8_lossy(&output.stderr).into_owned()),
        ))
    }
}

/// The CNI container id must avoid characters like `:`/`@` found in
/// Kubernetes-derived ids; hash the sandbox id instead (mirrors
/// `work/runtime/ipam.rs`'s `ipam_container_id`).
fn cni_container_id(sandbox_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sandbox_id.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Default, Deserialize, serde::Serialize)]
struct CniAddResult {
    #[serde(default)]
    ips: Vec<CniAddResultIp>,
}

#[derive(Debug, Default, Deserialize, serde::Serialize)]
struct CniAddResultIp {
    address: String,
}
