//! The compose command seam.
//!
//! The stack runner only talks to [`ComposeCli`], so the real
//! `docker compose` invocation can be swapped for a scripted double in tests.

use crate::docker::{check_daemon_with_retry, ContainerState, DockerClient, DockerError};
use crate::error::Result;
use crate::service::{next_lossy_line, OutputStream, ProcessHandle, ProcessKind};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, BufReader};
use tokio::sync::{mpsc, OnceCell};

const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);
const PS_TIMEOUT: Duration = Duration::from_secs(30);
const DOWN_TIMEOUT: Duration = Duration::from_secs(180);
const LOG_TAIL: &str = "50";
const DAEMON_CHECK_ATTEMPTS: u32 = 5;
const DAEMON_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Result of a streamed compose command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Merged stdout/stderr, in arrival order.
    pub output: String,
}

impl CommandOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            output: output.into(),
        }
    }

    pub fn failed(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            output: output.into(),
        }
    }
}

/// Operations the stack runner and shutdown coordinator need from compose.
///
/// Streaming commands send each output line to `lines` as it arrives and
/// also return the full captured output.
#[async_trait]
pub trait ComposeCli: Send + Sync {
    /// Whether the container daemon answers, retrying while it starts up.
    async fn daemon_available(&self) -> bool;

    async fn build(&self, manifest: &Path, lines: mpsc::UnboundedSender<String>) -> Result<CommandOutcome>;

    /// Start the stack detached.
    async fn up(&self, manifest: &Path, lines: mpsc::UnboundedSender<String>) -> Result<CommandOutcome>;

    /// Container id of `service`, `None` if it has no container.
    async fn container_id(&self, manifest: &Path, service: &str) -> Result<Option<String>>;

    async fn inspect(&self, container_id: &str) -> Result<ContainerState>;

    async fn down(&self, manifest: &Path) -> Result<CommandOutcome>;

    /// Follow the live logs of `service` into `output`.
    async fn attach_logs(&self, manifest: &Path, service: &str, output: OutputStream) -> Result<ProcessHandle>;
}

/// Docker Compose command type (v1 or v2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeCommand {
    /// `docker compose`
    V2,
    /// `docker-compose`
    V1,
}

static COMPOSE_COMMAND: OnceCell<ComposeCommand> = OnceCell::const_new();

impl ComposeCommand {
    async fn detect() -> std::result::Result<ComposeCommand, DockerError> {
        let v2_check = tokio::process::Command::new("docker")
            .args(["compose", "version"])
            .output()
            .await;
        if let Ok(output) = v2_check {
            if output.status.success() {
                return Ok(ComposeCommand::V2);
            }
        }

        let v1_check = tokio::process::Command::new("docker-compose")
            .arg("--version")
            .output()
            .await;
        if let Ok(output) = v1_check {
            if output.status.success() {
                return Ok(ComposeCommand::V1);
            }
        }

        Err(DockerError::ComposeUnavailable)
    }

    /// The available compose command, detected once per process.
    pub async fn get() -> std::result::Result<ComposeCommand, DockerError> {
        COMPOSE_COMMAND
            .get_or_try_init(|| async { Self::detect().await })
            .await
            .copied()
    }

    fn command_and_args(&self) -> (&'static str, &'static [&'static str]) {
        const V2_ARGS: &[&str] = &["compose"];
        const V1_ARGS: &[&str] = &[];
        match self {
            ComposeCommand::V2 => ("docker", V2_ARGS),
            ComposeCommand::V1 => ("docker-compose", V1_ARGS),
        }
    }
}

/// [`ComposeCli`] backed by the real `docker compose` / `docker-compose` binary.
#[derive(Debug, Clone)]
pub struct DockerComposeCli {
    project: String,
    work_dir: PathBuf,
    docker: DockerClient,
}

impl DockerComposeCli {
    pub fn new(project: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            work_dir: work_dir.into(),
            docker: DockerClient::new(),
        }
    }

    async fn base_command(&self, manifest: &Path) -> Result<(tokio::process::Command, ComposeCommand)> {
        let variant = ComposeCommand::get().await?;
        let (program, base_args) = variant.command_and_args();
        let mut command = tokio::process::Command::new(program);
        command
            .args(base_args)
            .arg("-f")
            .arg(manifest)
            .arg("-p")
            .arg(&self.project)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null());
        Ok((command, variant))
    }

    fn describe(variant: ComposeCommand, args: &[&str]) -> String {
        let (program, base) = variant.command_and_args();
        let mut parts = vec![program];
        parts.extend_from_slice(base);
        parts.extend_from_slice(args);
        parts.join(" ")
    }

    /// Run a compose subcommand, streaming merged output lines.
    async fn run_streaming(
        &self,
        manifest: &Path,
        args: &[&str],
        lines: mpsc::UnboundedSender<String>,
    ) -> Result<CommandOutcome> {
        let (mut command, variant) = self.base_command(manifest).await?;
        let description = Self::describe(variant, args);
        command
            .args(args)
            .env("BUILDKIT_PROGRESS", "plain")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!("Running {}", description);
        let mut child = command
            .spawn()
            .map_err(|e| DockerError::exec_failed(&description, e))?;

        let (merged_tx, mut merged_rx) = mpsc::unbounded_channel::<String>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, merged_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, merged_tx.clone()));
        }
        drop(merged_tx);

        let mut captured = Vec::new();
        while let Some(line) = merged_rx.recv().await {
            let _ = lines.send(line.clone());
            captured.push(line);
        }
        futures::future::join_all(readers).await;

        let status = child
            .wait()
            .await
            .map_err(|e| DockerError::exec_failed(&description, e))?;
        Ok(CommandOutcome {
            success: status.success(),
            exit_code: status.code(),
            output: captured.join("\n"),
        })
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        // Keep draining after the receiver is gone so compose never sees EPIPE.
        while let Ok(Some(line)) = next_lossy_line(&mut reader, &mut buf).await {
            let _ = tx.send(line);
        }
    })
}

#[async_trait]
impl ComposeCli for DockerComposeCli {
    async fn daemon_available(&self) -> bool {
        check_daemon_with_retry(&self.docker, DAEMON_CHECK_ATTEMPTS, DAEMON_CHECK_TIMEOUT).await
    }

    #[tracing::instrument(skip(self, lines), fields(project = %self.project))]
    async fn build(&self, manifest: &Path, lines: mpsc::UnboundedSender<String>) -> Result<CommandOutcome> {
        self.run_streaming(manifest, &["build"], lines).await
    }

    #[tracing::instrument(skip(self, lines), fields(project = %self.project))]
    async fn up(&self, manifest: &Path, lines: mpsc::UnboundedSender<String>) -> Result<CommandOutcome> {
        self.run_streaming(manifest, &["up", "-d"], lines).await
    }

    async fn container_id(&self, manifest: &Path, service: &str) -> Result<Option<String>> {
        let (mut command, variant) = self.base_command(manifest).await?;
        // v1 lists stopped containers by default and has no `-a`.
        let args: &[&str] = match variant {
            ComposeCommand::V2 => &["ps", "-a", "-q"],
            ComposeCommand::V1 => &["ps", "-q"],
        };
        let description = Self::describe(variant, args);
        command.args(args).arg(service);

        let output = match tokio::time::timeout(PS_TIMEOUT, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(DockerError::exec_failed(description, e).into()),
            Err(_) => return Err(DockerError::timeout(description, PS_TIMEOUT).into()),
        };
        if !output.status.success() {
            return Err(DockerError::failed(description, &output).into());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerState> {
        Ok(self.docker.inspect_state(container_id, INSPECT_TIMEOUT).await?)
    }

    #[tracing::instrument(skip(self), fields(project = %self.project))]
    async fn down(&self, manifest: &Path) -> Result<CommandOutcome> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        // Drain so the channel never backs up; the outcome carries the text.
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let args = ["down", "--remove-orphans"];
        let outcome = tokio::time::timeout(DOWN_TIMEOUT, self.run_streaming(manifest, &args, tx)).await;
        drain.abort();
        match outcome {
            Ok(result) => result,
            Err(_) => Err(DockerError::timeout("compose down", DOWN_TIMEOUT).into()),
        }
    }

    async fn attach_logs(&self, manifest: &Path, service: &str, output: OutputStream) -> Result<ProcessHandle> {
        let (mut command, variant) = self.base_command(manifest).await?;
        let args = ["logs", "-f", "--no-color", "--tail", LOG_TAIL];
        let description = Self::describe(variant, &args);
        command
            .args(args)
            .arg(service)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| DockerError::exec_failed(&description, e))?;
        if let Some(stdout) = child.stdout.take() {
            output.spawn_reader(stdout, None);
        }
        if let Some(stderr) = child.stderr.take() {
            output.spawn_reader(stderr, None);
        }
        Ok(ProcessHandle::supervise(child, ProcessKind::ContainerLogs))
    }
}
