//! Host-network mode. Not selected through `LXENetworkPlugin` — the
//! orchestrator picks `host` directly from the sandbox's namespace options
//! (spec §4.2) and never invokes plugin hooks for it (spec §4.2,
//! end-to-end scenario 2). Provided so every mode in the data model (spec
//! §3) has a concrete plugin, e.g. for direct unit testing of the trait.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;

use super::{ContainerNet, NetStatus, PodNet, Properties, PropertiesRunning};

#[derive(Default)]
pub struct HostPlugin;

#[async_trait]
impl super::NetworkPlugin for HostPlugin {
    fn pod_network(&self, _sandbox_id: &str, _annotations: &BTreeMap<String, String>) -> Box<dyn PodNet> {
        Box::new(HostPodNet)
    }

    async fn update_runtime_config(&self, _pod_cidr: &str) -> Result<()> {
        Ok(())
    }
}

struct HostPodNet;

#[async_trait]
impl PodNet for HostPodNet {
    async fn when_created(&self, _props: &Properties) -> Result<String> {
        Ok(String::new())
    }

    async fn when_started(&self, _props: &PropertiesRunning) -> Result<String> {
        Ok(String::new())
    }

    async fn when_stopped(&self, _props: &Properties) -> Result<()> {
        Ok(())
    }

    async fn when_deleted(&self, _props: &Properties) -> Result<()> {
        Ok(())
    }

    async fn status(&self, _props: &PropertiesRunning) -> Result<NetStatus> {
        Ok(NetStatus::default())
    }

    fn container_network(&self, _container_id: &str, _annotations: &BTreeMap<String, String>) -> Box<dyn ContainerNet> {
        Box::new(HostContainerNet)
    }
}

struct HostContainerNet;

#[async_trait]
impl ContainerNet for HostContainerNet {
    async fn when_created(&self, _props: &Properties) -> Result<String> {
        Ok(String::new())
    }
}
