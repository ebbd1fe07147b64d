//! Centralized Docker CLI client.
//!
//! All plain `docker` invocations go through `DockerClient`, which provides
//! consistent timeout handling and error mapping to [`DockerError`]. Compose
//! invocations live in `compose::cli`.

use super::DockerError;
use std::process::Output;
use std::time::Duration;

/// Container state as reported by `docker inspect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    /// `created`, `running`, `restarting`, `exited`, `dead`, ...
    pub status: String,
    /// Healthcheck status, `None` when the container defines no healthcheck.
    pub health: Option<String>,
}

impl ContainerState {
    /// Parse the `{{.State.Status}}|{{.State.Health.Status}}` inspect format.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let (status, health) = match raw.split_once('|') {
            Some((status, health)) => (status.trim(), health.trim()),
            None => (raw, ""),
        };
        Some(Self {
            status: status.to_string(),
            health: if health.is_empty() {
                None
            } else {
                Some(health.to_string())
            },
        })
    }
}

const STATE_FORMAT: &str = "{{.State.Status}}|{{if .State.Health}}{{.State.Health.Status}}{{end}}";

#[derive(Debug, Clone)]
pub struct DockerClient;

impl DockerClient {
    pub fn new() -> Self {
        DockerClient
    }

    /// Run a docker command with a timeout, returning raw Output.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("docker").args(args).output(),
        )
        .await;

        let cmd_str = format!("docker {}", args.join(" "));

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(DockerError::exec_failed(cmd_str, e)),
            Err(_) => Err(DockerError::timeout(cmd_str, timeout)),
        }
    }

    /// Inspect a container's lifecycle and health status.
    pub async fn inspect_state(
        &self,
        container: &str,
        timeout: Duration,
    ) -> Result<ContainerState, DockerError> {
        let output = self
            .run(&["inspect", "-f", STATE_FORMAT, container], timeout)
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such") {
                return Err(DockerError::ContainerNotFound {
                    container: container.to_string(),
                });
            }
            return Err(DockerError::failed("docker inspect", &output));
        }
        ContainerState::parse(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            DockerError::cmd_failed("docker inspect", "empty inspect output", Some(0))
        })
    }

    /// Check if the Docker daemon is healthy.
    pub async fn daemon_healthy(&self, timeout: Duration) -> bool {
        match self
            .run(&["info", "--format", "{{.ServerVersion}}"], timeout)
            .await
        {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    }
}

impl Default for DockerClient {
    fn default() -> Self {
        Self::new()
    }
}
