//! End-to-end lifecycle scenarios against an in-memory backend, exercising
//! the orchestrator the way a kubelet sequence of CRI calls would.

use std::sync::Arc;

use lxe::backend::ExecOutcome;
use lxe::backend::fake::FakeBackend;
use lxe::network::NetworkPluginKind;
use lxe::orchestrator::Orchestrator;
use lxe::proto::runtime::v1 as pb;

fn orchestrator() -> (Orchestrator, Arc<FakeBackend>) {
    let fake = Arc::new(FakeBackend::new());
    let backend: Arc<dyn lxe::backend::Backend> = fake.clone();
    let orch = Orchestrator::new(backend, NetworkPluginKind::Bridged, "/etc/lxe/hostnetwork.conf".to_string());
    (orch, fake)
}

fn metadata(name: &str) -> pb::PodSandboxMetadata {
    pb::PodSandboxMetadata { name: name.to_string(), namespace: "default".to_string(), uid: format!("uid-{name}"), attempt: 0 }
}

#[tokio::test]
async fn list_containers_filters_by_sandbox_and_state() {
    let (orch, _fake) = orchestrator();
    let sandbox_a = orch
        .run_pod_sandbox(pb::PodSandboxConfig { metadata: Some(metadata("a")), ..Default::default() }, "")
        .await
        .unwrap();
    let sandbox_b = orch
        .run_pod_sandbox(pb::PodSandboxConfig { metadata: Some(metadata("b")), ..Default::default() }, "")
        .await
        .unwrap();

    let container_a = orch
        .create_container(&sandbox_a, pb::ContainerConfig::default(), pb::PodSandboxConfig::default())
        .await
        .unwrap();
    let container_b = orch
        .create_container(&sandbox_b, pb::ContainerConfig::default(), pb::PodSandboxConfig::default())
        .await
        .unwrap();
    orch.start_container(&container_a).await.unwrap();

    let all = orch.list_containers(None).await.unwrap();
    assert_eq!(all.len(), 2);

    let only_a = orch
        .list_containers(Some(pb::ContainerFilter { pod_sandbox_id: sandbox_a.clone(), ..Default::default() }))
        .await
        .unwrap();
    assert_eq!(only_a.iter().map(|c| &c.id).collect::<Vec<_>>(), vec![&container_a]);

    let only_running = orch
        .list_containers(Some(pb::ContainerFilter {
            state: Some(pb::ContainerStateValue { state: pb::ContainerState::ContainerRunning as i32 }),
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_eq!(only_running.iter().map(|c| &c.id).collect::<Vec<_>>(), vec![&container_a]);

    assert!(!only_a.iter().any(|c| c.id == container_b));
}

#[tokio::test]
async fn port_mappings_translate_into_sandbox_devices() {
    let (orch, _fake) = orchestrator();
    let config = pb::PodSandboxConfig {
        metadata: Some(metadata("web")),
        port_mappings: vec![pb::PortMapping {
            protocol: pb::Protocol::Tcp as i32,
            container_port: 8080,
            host_port: 30080,
            host_ip: String::new(),
        }],
        ..Default::default()
    };

    let sandbox_id = orch.run_pod_sandbox(config, "").await.unwrap();
    let (status, _) = orch.pod_sandbox_status(&sandbox_id).await.unwrap();
    assert_eq!(status.state, pb::PodSandboxState::SandboxReady as i32);
}

#[tokio::test]
async fn cloud_init_environment_round_trips_through_create_container() {
    let (orch, _fake) = orchestrator();
    let sandbox_id = orch
        .run_pod_sandbox(pb::PodSandboxConfig { metadata: Some(metadata("web")), ..Default::default() }, "")
        .await
        .unwrap();

    let config = pb::ContainerConfig {
        metadata: Some(pb::ContainerMetadata { name: "app".to_string(), attempt: 0 }),
        envs: vec![
            pb::KeyValue { key: "user-data".to_string(), value: "#cloud-config\nruncmd: [echo hi]\n".to_string() },
            pb::KeyValue { key: "APP_ENV".to_string(), value: "prod".to_string() },
        ],
        ..Default::default()
    };

    let container_id = orch.create_container(&sandbox_id, config, pb::PodSandboxConfig::default()).await.unwrap();
    let status = orch.container_status(&container_id).await.unwrap();
    assert_eq!(status.metadata.unwrap().name, "app");
}

#[tokio::test]
async fn exec_sync_nonzero_exit_is_reported_as_an_error_chain() {
    let (orch, fake) = orchestrator();
    let sandbox_id = orch
        .run_pod_sandbox(pb::PodSandboxConfig { metadata: Some(metadata("web")), ..Default::default() }, "")
        .await
        .unwrap();
    let container_id = orch
        .create_container(&sandbox_id, pb::ContainerConfig::default(), pb::PodSandboxConfig::default())
        .await
        .unwrap();

    fake.push_exec_result(&container_id, ExecOutcome { stdout: Vec::new(), stderr: b"boom".to_vec(), exit_code: 3 });

    let err = orch.exec_sync(&container_id, vec!["nonexistent-binary".to_string()], 5).await.unwrap_err();
    let lxe::error::Error::ExecExitError { code, stderr, .. } = err else {
        panic!("expected ExecExitError");
    };
    assert_eq!(code, 3);
    assert_eq!(stderr, b"boom");
}

#[tokio::test]
async fn exec_sync_rpc_still_returns_exit_code_and_stderr_on_nonzero_exit() {
    use lxe::cri_service::CriService;
    use lxe::proto::runtime::v1::runtime_service_server::RuntimeService;
    use lxe::streaming::StreamingServer;
    use std::sync::Arc;

    let (orch, fake) = orchestrator();
    let sandbox_id = orch
        .run_pod_sandbox(pb::PodSandboxConfig { metadata: Some(metadata("web")), ..Default::default() }, "")
        .await
        .unwrap();
    let container_id = orch
        .create_container(&sandbox_id, pb::ContainerConfig::default(), pb::PodSandboxConfig::default())
        .await
        .unwrap();

    fake.push_exec_result(&container_id, ExecOutcome { stdout: Vec::new(), stderr: b"boom".to_vec(), exit_code: 3 });

    let orch = Arc::new(orch);
    let streaming = Arc::new(StreamingServer::new(orch.clone(), "127.0.0.1", 0).unwrap());
    let service = CriService::new(orch, streaming);

    let response = service
        .exec_sync(tonic::Request::new(pb::ExecSyncRequest { container_id, cmd: vec!["nonexistent-binary".to_string()], timeout: 5 }))
        .await
        .expect("ExecSync RPC itself does not fail on a non-zero exit code")
        .into_inner();

    assert_eq!(response.exit_code, 3);
    assert_eq!(response.stderr, b"boom");
}

#[tokio::test]
async fn update_runtime_config_accepts_pod_cidr() {
    let (orch, _fake) = orchestrator();
    orch.update_runtime_config("10.244.0.0/16").await.unwrap();
}

#[tokio::test]
async fn version_and_status_report_ready() {
    let (orch, _fake) = orchestrator();
    let (_runtime_version, runtime_api_version) = orch.version().await.unwrap();
    assert_eq!(runtime_api_version, "fake-backend-1");

    let status = orch.status();
    assert!(status.conditions.iter().all(|c| c.status));
}
