//! In-memory [`Backend`] double used by integration tests and the streaming
//! module's own tests. Mirrors real backend semantics closely enough to
//! exercise the orchestrator: not-found on missing ids, idempotent delete
//! is the orchestrator's job, not this double's.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::{
    Backend, BoxedReader, BoxedWriter, Container, ContainerFilter, ExecOutcome, Sandbox,
    SandboxFilter, TerminalSize, labels_match,
};

#[derive(Default)]
pub struct FakeBackend {
    sandboxes: Mutex<HashMap<String, Sandbox>>,
    containers: Mutex<HashMap<String, Container>>,
    /// Scripted exec responses, consumed in order per container id.
    exec_script: Mutex<HashMap<String, Vec<ExecOutcome>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next [`ExecOutcome`] `exec` will return for `container_id`.
    pub fn push_exec_result(&self, container_id: &str, outcome: ExecOutcome) {
        self.exec_script
            .lock()
            .unwrap()
            .entry(container_id.to_string())
            .or_default()
            .push(outcome);
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn create_sandbox(&self, sandbox: Sandbox) -> Result<()> {
        self.sandboxes.lock().unwrap().insert(sandbox.id.clone(), sandbox);
        Ok(())
    }

    async fn update_sandbox(&self, sandbox: &Sandbox) -> Result<()> {
        let mut sandboxes = self.sandboxes.lock().unwrap();
        if !sandboxes.contains_key(&sandbox.id) {
            return Err(Error::NotFound(sandbox.id.clone()));
        }
        sandboxes.insert(sandbox.id.clone(), sandbox.clone());
        Ok(())
    }

    async fn get_sandbox(&self, id: &str) -> Result<Sandbox> {
        self.sandboxes
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn list_sandboxes(&self, filter: &SandboxFilter) -> Result<Vec<Sandbox>> {
        Ok(self
            .sandboxes
            .lock()
            .unwrap()
            .values()
            .filter(|s| filter.id.as_deref().is_none_or(|id| id == s.id))
            .filter(|s| filter.state.is_none_or(|state| state == s.state))
            .filter(|s| labels_match(&filter.labels, &s.labels))
            .cloned()
            .collect())
    }

    async fn stop_sandbox(&self, id: &str) -> Result<()> {
        self.get_sandbox(id).await?;
        Ok(())
    }

    async fn delete_sandbox(&self, id: &str) -> Result<()> {
        self.sandboxes
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn create_container(&self, container: Container) -> Result<()> {
        self.containers
            .lock()
            .unwrap()
            .insert(container.id.clone(), container);
        Ok(())
    }

    async fn get_container(&self, id: &str) -> Result<Container> {
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<Container>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .filter(|c| filter.id.as_deref().is_none_or(|id| id == c.id))
            .filter(|c| filter.state.is_none_or(|state| state == c.state))
            .filter(|c| {
                filter
                    .sandbox_id
                    .as_deref()
                    .is_none_or(|sandbox_id| sandbox_id == c.sandbox_id)
            })
            .filter(|c| labels_match(&filter.labels, &c.labels))
            .cloned()
            .collect())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers.get_mut(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        container.state = super::ContainerState::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers.get_mut(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        container.state = super::ContainerState::Exited;
        Ok(())
    }

    async fn delete_container(&self, id: &str) -> Result<()> {
        self.containers
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn container_default_interface_ip(&self, id: &str) -> Result<Option<String>> {
        self.get_container(id).await?;
        Ok(None)
    }

    async fn exec(
        &self,
        container_id: &str,
        _cmd: &[String],
        _stdin: &[u8],
        _timeout: Option<Duration>,
    ) -> Result<ExecOutcome> {
        let mut script = self.exec_script.lock().unwrap();
        Ok(script
            .get_mut(container_id)
            .filter(|queue| !queue.is_empty())
            .map(|queue| queue.remove(0))
            .unwrap_or_default())
    }

    async fn runtime_api_version(&self) -> Result<String> {
        Ok("fake-backend-1".to_string())
    }

    /// No real pty: drains `stdin` and `resize` to EOF/close, then replays
    /// whatever [`Self::push_exec_result`] scripted, same as buffered
    /// `exec`. Good enough to exercise the streaming server's plumbing in
    /// tests without a real backend.
    async fn exec_streamed(
        &self,
        container_id: &str,
        _cmd: &[String],
        _tty: bool,
        _interactive: bool,
        mut stdin: BoxedReader,
        mut stdout: BoxedWriter,
        mut stderr: BoxedWriter,
        mut resize: mpsc::Receiver<TerminalSize>,
    ) -> Result<i32> {
        let mut discard = Vec::new();
        let _ = stdin.read_to_end(&mut discard).await;
        while resize.recv().await.is_some() {}

        let outcome = {
            let mut script = self.exec_script.lock().unwrap();
            script
                .get_mut(container_id)
                .filter(|queue| !queue.is_empty())
                .map(|queue| queue.remove(0))
                .unwrap_or_default()
        };
        let _ = stdout.write_all(&outcome.stdout).await;
        let _ = stderr.write_all(&outcome.stderr).await;
        Ok(outcome.exit_code)
    }
}
