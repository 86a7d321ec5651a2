//! Bridged pod networking: the default plugin (`LXENetworkPlugin=default`,
//! spec §6). Attaching the actual NIC device is the backend's job (the
//! orchestrator encodes a `nic` device from the plugin's `mode-data`); this
//! plugin's role is picking which host bridge to join and recording that
//! choice so it survives a restart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::{ContainerNet, NetStatus, PodNet, Properties, PropertiesRunning};

const DEFAULT_BRIDGE: &str = "lxdbr0";
/// Annotation naming the parent bridge for this sandbox (spec §6).
const BRIDGE_ANNOTATION: &str = "x-lxe-bridge";

#[derive(Default)]
pub struct BridgedPlugin;

#[async_trait]
impl super::NetworkPlugin for BridgedPlugin {
    fn pod_network(&self, _sandbox_id: &str, annotations: &BTreeMap<String, String>) -> Box<dyn PodNet> {
        let bridge = annotations
            .get(BRIDGE_ANNOTATION)
            .cloned()
            .unwrap_or_else(|| DEFAULT_BRIDGE.to_string());
        Box::new(BridgedPodNet { bridge })
    }

    async fn update_runtime_config(&self, _pod_cidr: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct BridgedModeData {
    bridge: String,
}

struct BridgedPodNet {
    bridge: String,
}

#[async_trait]
impl PodNet for BridgedPodNet {
    async fn when_created(&self, _props: &Properties) -> Result<String> {
        Ok(serde_json::to_string(&BridgedModeData { bridge: self.bridge.clone() }).unwrap())
    }

    async fn when_started(&self, props: &PropertiesRunning) -> Result<String> {
        Ok(props.base.data.clone())
    }

    async fn when_stopped(&self, _props: &Properties) -> Result<()> {
        Ok(())
    }

    async fn when_deleted(&self, _props: &Properties) -> Result<()> {
        Ok(())
    }

    async fn status(&self, _props: &PropertiesRunning) -> Result<NetStatus> {
        // Bridged mode falls through to per-container introspection for IP
        // resolution (spec §4.4 case 4); the plugin itself tracks no IPs.
        Ok(NetStatus::default())
    }

    fn container_network(&self, _container_id: &str, _annotations: &BTreeMap<String, String>) -> Box<dyn ContainerNet> {
        Box::new(BridgedContainerNet {
            bridge: self.bridge.clone(),
        })
    }
}

struct BridgedContainerNet {
    bridge: String,
}

#[async_trait]
impl ContainerNet for BridgedContainerNet {
    async fn when_created(&self, _props: &Properties) -> Result<String> {
        Ok(self.bridge.clone())
    }
}
