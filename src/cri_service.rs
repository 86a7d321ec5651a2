//! RPC surface (spec §4.6, §6): marshals `runtime.v1.RuntimeService`
//! requests into [`Orchestrator`] calls and responses back into Tonic
//! shapes. No retries, no business logic — just translation, logging,
//! and wrapping [`crate::error::Error`] into [`Status`] at the boundary.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{debug, info};

use crate::error::Error;
use crate::orchestrator::Orchestrator;
use crate::proto::runtime::v1 as pb;
use crate::proto::runtime::v1::runtime_service_server::RuntimeService;
use crate::streaming::StreamingServer;

pub struct CriService {
    orchestrator: Arc<Orchestrator>,
    streaming: Arc<StreamingServer>,
}

impl CriService {
    pub fn new(orchestrator: Arc<Orchestrator>, streaming: Arc<StreamingServer>) -> Self {
        CriService { orchestrator, streaming }
    }
}

type TonicResult<T> = Result<Response<T>, Status>;

#[tonic::async_trait]
impl RuntimeService for CriService {
    async fn version(&self, request: Request<pb::VersionRequest>) -> TonicResult<pb::VersionResponse> {
        debug!(?request, "Version");
        let (runtime_version, runtime_api_version) = self.orchestrator.version().await.map_err(Status::from)?;
        Ok(Response::new(pb::VersionResponse {
            version: crate::orchestrator::CRI_VERSION.to_string(),
            runtime_name: crate::orchestrator::RUNTIME_NAME.to_string(),
            runtime_version,
            runtime_api_version,
        }))
    }

    async fn run_pod_sandbox(&self, request: Request<pb::RunPodSandboxRequest>) -> TonicResult<pb::RunPodSandboxResponse> {
        let request = request.into_inner();
        info!(runtime_handler = %request.runtime_handler, "RunPodSandbox");
        let config = request.config.unwrap_or_default();
        let id = self
            .orchestrator
            .run_pod_sandbox(config, &request.runtime_handler)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(pb::RunPodSandboxResponse { pod_sandbox_id: id }))
    }

    async fn stop_pod_sandbox(&self, request: Request<pb::StopPodSandboxRequest>) -> TonicResult<pb::StopPodSandboxResponse> {
        let request = request.into_inner();
        info!(sandbox_id = %request.pod_sandbox_id, "StopPodSandbox");
        self.orchestrator.stop_pod_sandbox(&request.pod_sandbox_id).await.map_err(Status::from)?;
        Ok(Response::new(pb::StopPodSandboxResponse {}))
    }

    async fn remove_pod_sandbox(&self, request: Request<pb::RemovePodSandboxRequest>) -> TonicResult<pb::RemovePodSandboxResponse> {
        let request = request.into_inner();
        info!(sandbox_id = %request.pod_sandbox_id, "RemovePodSandbox");
        self.orchestrator.remove_pod_sandbox(&request.pod_sandbox_id).await.map_err(Status::from)?;
        Ok(Response::new(pb::RemovePodSandboxResponse {}))
    }

    async fn pod_sandbox_status(&self, request: Request<pb::PodSandboxStatusRequest>) -> TonicResult<pb::PodSandboxStatusResponse> {
        let request = request.into_inner();
        debug!(sandbox_id = %request.pod_sandbox_id, "PodSandboxStatus");
        let (status, containers_statuses) = self
            .orchestrator
            .pod_sandbox_status(&request.pod_sandbox_id)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(pb::PodSandboxStatusResponse {
            status: Some(status),
            info: Default::default(),
            containers_statuses,
            timestamp: 0,
        }))
    }

    async fn list_pod_sandbox(&self, request: Request<pb::ListPodSandboxRequest>) -> TonicResult<pb::ListPodSandboxResponse> {
        let request = request.into_inner();
        debug!(?request.filter, "ListPodSandbox");
        let items = self.orchestrator.list_pod_sandbox(request.filter).await.map_err(Status::from)?;
        Ok(Response::new(pb::ListPodSandboxResponse { items }))
    }

    async fn create_container(&self, request: Request<pb::CreateContainerRequest>) -> TonicResult<pb::CreateContainerResponse> {
        let request = request.into_inner();
        info!(sandbox_id = %request.pod_sandbox_id, "CreateContainer");
        let config = request.config.unwrap_or_default();
        let sandbox_config = request.sandbox_config.unwrap_or_default();
        let id = self
            .orchestrator
            .create_container(&request.pod_sandbox_id, config, sandbox_config)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(pb::CreateContainerResponse { container_id: id }))
    }

    async fn start_container(&self, request: Request<pb::StartContainerRequest>) -> TonicResult<pb::StartContainerResponse> {
        let request = request.into_inner();
        info!(container_id = %request.container_id, "StartContainer");
        self.orchestrator.start_container(&request.container_id).await.map_err(Status::from)?;
        Ok(Response::new(pb::StartContainerResponse {}))
    }

    async fn stop_container(&self, request: Request<pb::StopContainerRequest>) -> TonicResult<pb::StopContainerResponse> {
        let request = request.into_inner();
        info!(container_id = %request.container_id, timeout = request.timeout, "StopContainer");
        self.orchestrator
            .stop_container(&request.container_id, request.timeout)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(pb::StopContainerResponse {}))
    }

    async fn remove_container(&self, request: Request<pb::RemoveContainerRequest>) -> TonicResult<pb::RemoveContainerResponse> {
        let request = request.into_inner();
        info!(container_id = %request.container_id, "RemoveContainer");
        self.orchestrator.remove_container(&request.container_id).await.map_err(Status::from)?;
        Ok(Response::new(pb::RemoveContainerResponse {}))
    }

    async fn container_status(&self, request: Request<pb::ContainerStatusRequest>) -> TonicResult<pb::ContainerStatusResponse> {
        let request = request.into_inner();
        debug!(container_id = %request.container_id, "ContainerStatus");
        let status = self.orchestrator.container_status(&request.container_id).await.map_err(Status::from)?;
        Ok(Response::new(pb::ContainerStatusResponse { status: Some(status), info: Default::default() }))
    }

    async fn list_containers(&self, request: Request<pb::ListContainersRequest>) -> TonicResult<pb::ListContainersResponse> {
        let request = request.into_inner();
        debug!(?request.filter, "ListContainers");
        let containers = self.orchestrator.list_containers(request.filter).await.map_err(Status::from)?;
        Ok(Response::new(pb::ListContainersResponse { containers }))
    }

    async fn update_container_resources(
        &self,
        _request: Request<pb::UpdateContainerResourcesRequest>,
    ) -> TonicResult<pb::UpdateContainerResourcesResponse> {
        Err(Status::from(Error::NotImplemented("UpdateContainerResources")))
    }

    async fn reopen_container_log(&self, _request: Request<pb::ReopenContainerLogRequest>) -> TonicResult<pb::ReopenContainerLogResponse> {
        Err(Status::from(Error::NotImplemented("ReopenContainerLog")))
    }

    async fn exec_sync(&self, request: Request<pb::ExecSyncRequest>) -> TonicResult<pb::ExecSyncResponse> {
        let request = request.into_inner();
        debug!(container_id = %request.container_id, cmd = ?request.cmd, "ExecSync");
        match self.orchestrator.exec_sync(&request.container_id, request.cmd, request.timeout).await {
            Ok((stdout, stderr, exit_code)) => Ok(Response::new(pb::ExecSyncResponse { stdout, stderr, exit_code })),
            // A non-zero exit is not an RPC failure: the CRI wire contract
            // carries it in the response body (spec §4.5), so recover the
            // captured output from the error rather than aborting the call.
            Err(Error::ExecExitError { code, stdout, stderr, .. }) => {
                Ok(Response::new(pb::ExecSyncResponse { stdout, stderr, exit_code: code }))
            }
            Err(e) => Err(Status::from(e)),
        }
    }

    async fn exec(&self, request: Request<pb::ExecRequest>) -> TonicResult<pb::ExecResponse> {
        let request = request.into_inner();
        info!(container_id = %request.container_id, tty = request.tty, "Exec");
        let interactive = request.stdin;
        let url = self.streaming.exec_url(&request.container_id, request.cmd, request.tty, interactive);
        Ok(Response::new(pb::ExecResponse { url }))
    }

    async fn attach(&self, _request: Request<pb::AttachRequest>) -> TonicResult<pb::AttachResponse> {
        Err(Status::from(Error::NotImplemented("Attach")))
    }

    async fn port_forward(&self, request: Request<pb::PortForwardRequest>) -> TonicResult<pb::PortForwardResponse> {
        let request = request.into_inner();
        info!(sandbox_id = %request.pod_sandbox_id, ports = ?request.port, "PortForward");
        let ports = request.port.into_iter().map(|p| p as u16).collect();
        let url = self.streaming.port_forward_url(&request.pod_sandbox_id, ports);
        Ok(Response::new(pb::PortForwardResponse { url }))
    }

    async fn container_stats(&self, request: Request<pb::ContainerStatsRequest>) -> TonicResult<pb::ContainerStatsResponse> {
        let request = request.into_inner();
        debug!(container_id = %request.container_id, "ContainerStats");
        let stats = self.orchestrator.container_stats(&request.container_id).await.map_err(Status::from)?;
        Ok(Response::new(pb::ContainerStatsResponse { stats: Some(stats) }))
    }

    async fn list_container_stats(&self, request: Request<pb::ListContainerStatsRequest>) -> TonicResult<pb::ListContainerStatsResponse> {
        let request = request.into_inner();
        debug!(?request.filter, "ListContainerStats");
        let stats = self.orchestrator.list_container_stats(request.filter).await.map_err(Status::from)?;
        Ok(Response::new(pb::ListContainerStatsResponse { stats }))
    }

    async fn pod_sandbox_stats(&self, _request: Request<pb::PodSandboxStatsRequest>) -> TonicResult<pb::PodSandboxStatsResponse> {
        Err(Status::from(Error::NotImplemented("PodSandboxStats")))
    }

    async fn list_pod_sandbox_stats(&self, _request: Request<pb::ListPodSandboxStatsRequest>) -> TonicResult<pb::ListPodSandboxStatsResponse> {
        Err(Status::from(Error::NotImplemented("ListPodSandboxStats")))
    }

    async fn update_runtime_config(&self, request: Request<pb::UpdateRuntimeConfigRequest>) -> TonicResult<pb::UpdateRuntimeConfigResponse> {
        let pod_cidr = request.into_inner().runtime_config.unwrap_or_default().pod_cidr;
        info!(pod_cidr = %pod_cidr, "UpdateRuntimeConfig");
        self.orchestrator.update_runtime_config(&pod_cidr).await.map_err(Status::from)?;
        Ok(Response::new(pb::UpdateRuntimeConfigResponse {}))
    }

    async fn status(&self, request: Request<pb::StatusRequest>) -> TonicResult<pb::StatusResponse> {
        debug!(?request, "Status");
        Ok(Response::new(pb::StatusResponse { status: Some(self.orchestrator.status()), info: Default::default() }))
    }

    async fn checkpoint_container(&self, _request: Request<pb::CheckpointContainerRequest>) -> TonicResult<pb::CheckpointContainerResponse> {
        Err(Status::from(Error::NotImplemented("CheckpointContainer")))
    }

    type GetContainerEventsStream = tokio_stream::wrappers::ReceiverStream<Result<pb::ContainerEventResponse, Status>>;

    async fn get_container_events(
        &self,
        _request: Request<pb::GetEventsRequest>,
    ) -> TonicResult<Self::GetContainerEventsStream> {
        Err(Status::from(Error::NotImplemented("GetContainerEvents")))
    }

    async fn list_metric_descriptors(
        &self,
        _request: Request<pb::ListMetricDescriptorsRequest>,
    ) -> TonicResult<pb::ListMetricDescriptorsResponse> {
        Err(Status::from(Error::NotImplemented("ListMetricDescriptors")))
    }

    async fn list_pod_sandbox_metrics(
        &self,
        _request: Request<pb::ListPodSandboxMetricsRequest>,
    ) -> TonicResult<pb::ListPodSandboxMetricsResponse> {
        Err(Status::from(Error::NotImplemented("ListPodSandboxMetrics")))
    }

    async fn runtime_config(&self, _request: Request<pb::RuntimeConfigRequest>) -> TonicResult<pb::RuntimeConfigResponse> {
        Err(Status::from(Error::NotImplemented("RuntimeConfig")))
    }

    async fn update_pod_sandbox_resources(
        &self,
        _request: Request<pb::UpdatePodSandboxResourcesRequest>,
    ) -> TonicResult<pb::UpdatePodSandboxResourcesResponse> {
        Err(Status::from(Error::NotImplemented("UpdatePodSandboxResources")))
    }
}
