//! Shared test doubles.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use stackup::compose::{CommandOutcome, ComposeCli};
use stackup::docker::{ContainerState, DockerError};
use stackup::service::{OutputStream, ProcessHandle, ProcessKind};
use stackup::Result;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::process::Stdio;
use tokio::sync::mpsc;

/// In-memory `ComposeCli` whose answers are scripted per service.
///
/// Each service has a queue of container states; `inspect` pops the front
/// until one is left, which then repeats forever.
pub struct ScriptedCompose {
    /// Answer to `daemon_available`.
    pub daemon: Mutex<bool>,
    pub build_outcome: Mutex<CommandOutcome>,
    pub up_outcome: Mutex<CommandOutcome>,
    pub down_outcome: Mutex<CommandOutcome>,
    states: Mutex<HashMap<String, VecDeque<ContainerState>>>,
    missing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCompose {
    pub fn new() -> Self {
        Self {
            daemon: Mutex::new(true),
            build_outcome: Mutex::new(CommandOutcome::ok("")),
            up_outcome: Mutex::new(CommandOutcome::ok("")),
            down_outcome: Mutex::new(CommandOutcome::ok("")),
            states: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_states(self, service: &str, states: &[(&str, Option<&str>)]) -> Self {
        let queue = states
            .iter()
            .map(|(status, health)| ContainerState {
                status: status.to_string(),
                health: health.map(str::to_string),
            })
            .collect();
        self.states.lock().insert(service.to_string(), queue);
        self
    }

    /// `service` has no container.
    pub fn without_container(self, service: &str) -> Self {
        self.missing.lock().insert(service.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl ComposeCli for ScriptedCompose {
    async fn daemon_available(&self) -> bool {
        self.record("daemon");
        *self.daemon.lock()
    }

    async fn build(&self, _manifest: &Path, lines: mpsc::UnboundedSender<String>) -> Result<CommandOutcome> {
        self.record("build");
        let _ = lines.send("#5 [api 1/3] FROM node:20-alpine".to_string());
        let _ = lines.send(" api  Built".to_string());
        Ok(self.build_outcome.lock().clone())
    }

    async fn up(&self, _manifest: &Path, lines: mpsc::UnboundedSender<String>) -> Result<CommandOutcome> {
        self.record("up");
        let _ = lines.send(" Container stackup-api-1  Started".to_string());
        Ok(self.up_outcome.lock().clone())
    }

    async fn container_id(&self, _manifest: &Path, service: &str) -> Result<Option<String>> {
        self.record(format!("ps {}", service));
        if self.missing.lock().contains(service) {
            return Ok(None);
        }
        Ok(Some(format!("id-{}", service)))
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerState> {
        let service = container_id.trim_start_matches("id-");
        let mut states = self.states.lock();
        let queue = states.get_mut(service).ok_or_else(|| DockerError::ContainerNotFound {
            container: container_id.to_string(),
        })?;
        let state = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        let state = state.ok_or_else(|| DockerError::ContainerNotFound {
            container: container_id.to_string(),
        })?;
        Ok(state)
    }

    async fn down(&self, _manifest: &Path) -> Result<CommandOutcome> {
        self.record("down");
        Ok(self.down_outcome.lock().clone())
    }

    async fn attach_logs(&self, _manifest: &Path, service: &str, output: OutputStream) -> Result<ProcessHandle> {
        self.record(format!("logs {}", service));
        output.push(format!("{} | ready", service));
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .process_group(0)
            .spawn()?;
        Ok(ProcessHandle::supervise(child, ProcessKind::ContainerLogs))
    }
}
