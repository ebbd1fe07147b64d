//! Container stack lifecycle: build, start, wait for health, attach logs.
//!
//! ```text
//! NotStarted -> Building -> Built -> Starting -> WaitingHealthy -> Healthy
//!                  |                    |              |
//!                  +--------------------+--------------+--> Failed
//! ```
//!
//! Build and start failures, an unhealthy or exited container, and the
//! health-wait ceiling are all fatal to the phase.

use super::cli::ComposeCli;
use super::parse::{parse_build_line, parse_up_line, service_from_container, BuildEvent};
use crate::classify::ContainerErrorKind;
use crate::docker::ContainerState;
use crate::error::{Error, Result};
use crate::reporter::Reporter;
use crate::service::{ManagedProcess, OutputStream, ProcessRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StackState {
    NotStarted,
    Building,
    Built,
    Starting,
    WaitingHealthy,
    Healthy,
    Failed,
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StackState::NotStarted => "not started",
            StackState::Building => "building",
            StackState::Built => "built",
            StackState::Starting => "starting",
            StackState::WaitingHealthy => "waiting for health",
            StackState::Healthy => "healthy",
            StackState::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Timeout,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthRecord {
    pub service: String,
    pub status: HealthStatus,
    pub duration_ms: u64,
    pub message: String,
}

/// What one inspection says about a pending service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthDecision {
    /// Leaves the pending set.
    Ready(String),
    /// Still pending.
    Waiting(String),
    Unhealthy(String),
    Exited(String),
}

/// Decide a service's health from its container state.
///
/// A healthcheck result wins when one is defined; without one, `running` is
/// good enough.
pub fn evaluate(state: &ContainerState) -> HealthDecision {
    if matches!(state.status.as_str(), "exited" | "dead") {
        return HealthDecision::Exited(state.status.clone());
    }
    match state.health.as_deref() {
        Some("healthy") => HealthDecision::Ready("healthy".to_string()),
        Some("unhealthy") => HealthDecision::Unhealthy("healthcheck reported unhealthy".to_string()),
        Some(other) => HealthDecision::Waiting(format!("health: {}", other)),
        None if state.status == "running" => {
            HealthDecision::Ready("running (no healthcheck)".to_string())
        }
        None => HealthDecision::Waiting(format!("status: {}", state.status)),
    }
}

/// Health polling knobs.
#[derive(Debug, Clone, Copy)]
pub struct HealthOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct StackOutcome {
    pub health: Vec<HealthRecord>,
    pub processes: Vec<ManagedProcess>,
}

/// Drives one container stack through its lifecycle.
pub struct ContainerStackRunner {
    cli: Arc<dyn ComposeCli>,
    registry: Arc<ProcessRegistry>,
    reporter: Arc<dyn Reporter>,
    health: HealthOptions,
    project: String,
    state: Mutex<StackState>,
    records: Mutex<Vec<HealthRecord>>,
}

impl ContainerStackRunner {
    pub fn new(
        cli: Arc<dyn ComposeCli>,
        registry: Arc<ProcessRegistry>,
        reporter: Arc<dyn Reporter>,
        health: HealthOptions,
        project: impl Into<String>,
    ) -> Self {
        Self {
            cli,
            registry,
            reporter,
            health,
            project: project.into(),
            state: Mutex::new(StackState::NotStarted),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> StackState {
        *self.state.lock()
    }

    /// Health records produced so far, including those of a failed wait.
    pub fn health_records(&self) -> Vec<HealthRecord> {
        self.records.lock().clone()
    }

    fn transition(&self, next: StackState) {
        let mut state = self.state.lock();
        tracing::debug!(from = %*state, to = %next, "container stack transition");
        *state = next;
    }

    fn fail(&self, err: Error) -> Error {
        self.transition(StackState::Failed);
        err
    }

    /// Build, start, wait for health, then attach log streams.
    #[tracing::instrument(skip_all, fields(manifest = %manifest.display(), services = services.len()))]
    pub async fn run(&self, manifest: &Path, services: &[String]) -> Result<StackOutcome> {
        self.build(manifest).await?;
        self.start(manifest).await?;
        let health = self.wait_healthy(manifest, services).await?;
        let processes = self.attach_logs(manifest, services).await;
        Ok(StackOutcome { health, processes })
    }

    pub async fn build(&self, manifest: &Path) -> Result<()> {
        self.transition(StackState::Building);
        self.reporter.status("Building container images...");

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(report_build_progress(rx, Arc::clone(&self.reporter)));
        let outcome = self.cli.build(manifest, tx).await;
        let _ = consumer.await;

        let outcome = outcome.map_err(|e| self.fail(e))?;
        if !outcome.success {
            let kind = ContainerErrorKind::classify(&outcome.output);
            tracing::error!(%kind, exit_code = ?outcome.exit_code, "container build failed");
            return Err(self.fail(Error::ContainerBuild {
                kind,
                output: outcome.output,
            }));
        }
        self.transition(StackState::Built);
        Ok(())
    }

    pub async fn start(&self, manifest: &Path) -> Result<()> {
        self.transition(StackState::Starting);
        self.reporter.status("Starting container stack...");

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(report_up_progress(
            rx,
            Arc::clone(&self.reporter),
            self.project.clone(),
        ));
        let outcome = self.cli.up(manifest, tx).await;
        let _ = consumer.await;

        let outcome = outcome.map_err(|e| self.fail(e))?;
        if !outcome.success {
            let kind = ContainerErrorKind::classify(&outcome.output);
            tracing::error!(%kind, exit_code = ?outcome.exit_code, "container stack failed to start");
            return Err(self.fail(Error::ContainerStart {
                kind,
                output: outcome.output,
            }));
        }
        Ok(())
    }

    /// Poll every service until it is healthy, or fail.
    ///
    /// Pending services are re-evaluated in their original order on every
    /// pass. The whole wait is bounded by the health timeout.
    pub async fn wait_healthy(&self, manifest: &Path, services: &[String]) -> Result<Vec<HealthRecord>> {
        self.transition(StackState::WaitingHealthy);
        self.records.lock().clear();

        let started = Instant::now();
        let mut pending: Vec<String> = services.to_vec();
        let mut last_seen: Vec<String> = vec![String::new(); pending.len()];

        loop {
            let mut still_pending = Vec::with_capacity(pending.len());
            let mut still_seen = Vec::with_capacity(pending.len());

            for (service, seen) in pending.into_iter().zip(last_seen) {
                let decision = match self.cli.container_id(manifest, &service).await {
                    Ok(Some(id)) => match self.cli.inspect(&id).await {
                        Ok(state) => evaluate(&state),
                        Err(e) => HealthDecision::Waiting(format!("inspect failed: {}", e)),
                    },
                    Ok(None) => HealthDecision::Waiting("no container yet".to_string()),
                    Err(e) => HealthDecision::Waiting(format!("lookup failed: {}", e)),
                };
                let elapsed_ms = started.elapsed().as_millis() as u64;

                match decision {
                    HealthDecision::Ready(message) => {
                        tracing::info!(%service, elapsed_ms, "{}", message);
                        self.reporter.success(&format!("  {} is {}", service, message));
                        self.record(&service, HealthStatus::Healthy, elapsed_ms, message);
                    }
                    HealthDecision::Waiting(message) => {
                        if message != seen {
                            tracing::debug!(%service, "{}", message);
                        }
                        still_pending.push(service);
                        still_seen.push(message);
                    }
                    HealthDecision::Unhealthy(message) => {
                        self.record(&service, HealthStatus::Unhealthy, elapsed_ms, message.clone());
                        return Err(self.fail(Error::Unhealthy { service, message }));
                    }
                    HealthDecision::Exited(status) => {
                        self.record(
                            &service,
                            HealthStatus::Error,
                            elapsed_ms,
                            format!("container {}", status),
                        );
                        return Err(self.fail(Error::ServiceExited { service, status }));
                    }
                }
            }

            pending = still_pending;
            last_seen = still_seen;
            if pending.is_empty() {
                self.transition(StackState::Healthy);
                return Ok(self.health_records());
            }

            let waited = started.elapsed();
            if waited >= self.health.timeout {
                let waited_ms = waited.as_millis() as u64;
                for (service, message) in pending.iter().zip(&last_seen) {
                    self.record(service, HealthStatus::Timeout, waited_ms, message.clone());
                }
                tracing::error!(pending = ?pending, "health wait timed out after {:?}", waited);
                return Err(self.fail(Error::HealthTimeout { pending, waited }));
            }

            let remaining = self.health.timeout - waited;
            tokio::time::sleep(self.health.interval.min(remaining)).await;
        }
    }

    fn record(&self, service: &str, status: HealthStatus, duration_ms: u64, message: String) {
        self.records.lock().push(HealthRecord {
            service: service.to_string(),
            status,
            duration_ms,
            message,
        });
    }

    /// Attach a log stream per service and publish them to the registry.
    ///
    /// Attach failures only cost the log view, so they are warnings.
    pub async fn attach_logs(&self, manifest: &Path, services: &[String]) -> Vec<ManagedProcess> {
        let attaches = services.iter().map(|service| async move {
            let output = OutputStream::new(service.clone());
            match self.cli.attach_logs(manifest, service, output.clone()).await {
                Ok(handle) => Some(ManagedProcess::new(service.clone(), output, handle)),
                Err(e) => {
                    tracing::warn!(%service, "could not attach to container logs: {}", e);
                    self.reporter
                        .warning(&format!("{}: could not attach to container logs: {}", service, e));
                    None
                }
            }
        });
        let processes: Vec<ManagedProcess> = futures::future::join_all(attaches)
            .await
            .into_iter()
            .flatten()
            .collect();
        self.registry.publish(processes.clone());
        processes
    }
}

async fn report_build_progress(mut rx: mpsc::UnboundedReceiver<String>, reporter: Arc<dyn Reporter>) {
    while let Some(line) = rx.recv().await {
        match parse_build_line(&line) {
            Some(BuildEvent::Step {
                service,
                current,
                total,
                instruction,
            }) => {
                let label = service.unwrap_or_else(|| "build".to_string());
                tracing::debug!(service = %label, current, total, "{}", instruction);
                reporter.status(&format!("  [{}] step {}/{}: {}", label, current, total, instruction));
            }
            Some(BuildEvent::ServiceBuilt { service }) => {
                reporter.success(&format!("  {} built", service));
            }
            None => tracing::trace!("{}", line),
        }
    }
}

async fn report_up_progress(
    mut rx: mpsc::UnboundedReceiver<String>,
    reporter: Arc<dyn Reporter>,
    project: String,
) {
    while let Some(line) = rx.recv().await {
        match parse_up_line(&line) {
            Some(event) => {
                let service = service_from_container(&project, &event.container);
                tracing::debug!(%service, phase = %event.phase, "compose up");
                reporter.status(&format!("  {} {}", service, event.phase));
            }
            None => tracing::trace!("{}", line),
        }
    }
}
