//! `none` mode: no pod networking at all. IP resolution short-circuits to
//! empty (spec §4.4 case 2). Like [`super::host`], not reachable through
//! `LXENetworkPlugin` — present so the mode has a concrete plugin.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;

use super::{ContainerNet, NetStatus, PodNet, Properties, PropertiesRunning};

#[derive(Default)]
pub struct NonePlugin;

#[async_trait]
impl super::NetworkPlugin for NonePlugin {
    fn pod_network(&self, _sandbox_id: &str, _annotations: &BTreeMap<String, String>) -> Box<dyn PodNet> {
        Box::new(NonePodNet)
    }

    async fn update_runtime_config(&self, _pod_cidr: &str) -> Result<()> {
        Ok(())
    }
}

struct NonePodNet;

#[async_trait]
impl PodNet for NonePodNet {
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
        Box::new(NoneContainerNet)
    }
}

struct NoneContainerNet;

#[async_trait]
impl ContainerNet for NoneContainerNet {
    async fn when_created(&self, _props: &Properties) -> Result<String> {
        Ok(String::new())
    }
}
