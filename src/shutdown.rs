//! Coordinated teardown of local processes and the container stack.
//!
//! Both phases are best-effort and never return an error: every failure is
//! recorded in the [`StopReport`] instead, and a failure in one phase does not
//! keep the other from running.

use crate::compose::{ComposeCli, ComposeManifest, InfraKind};
use crate::config::OrchestratorOptions;
use crate::reporter::{QuietReporter, Reporter};
use crate::service::{ManagedProcess, ProcessKind, ProcessRegistry};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopKind {
    Process,
    PlannedDocker,
    InfraDocker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopRecord {
    pub service: String,
    pub kind: StopKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StopRecord {
    fn new(service: impl Into<String>, kind: StopKind) -> Self {
        Self {
            service: service.into(),
            kind,
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Container half of a [`StopReport`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct DockerStopReport {
    pub stopped: Vec<StopRecord>,
    pub skipped: Vec<StopRecord>,
    pub errors: Vec<StopRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub stopped_processes: usize,
    pub process_errors: Vec<StopRecord>,
    pub docker: DockerStopReport,
    pub elapsed_ms: u64,
    pub success: bool,
}

impl StopReport {
    pub fn error_count(&self) -> usize {
        self.process_errors.len() + self.docker.errors.len()
    }
}

impl fmt::Display for StopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stopped {} process(es), {} container service(s) ({} skipped), {} error(s) in {}ms",
            self.stopped_processes,
            self.docker.stopped.len(),
            self.docker.skipped.len(),
            self.error_count(),
            self.elapsed_ms
        )
    }
}

pub struct ShutdownCoordinator {
    registry: Arc<ProcessRegistry>,
    cli: Arc<dyn ComposeCli>,
    reporter: Arc<dyn Reporter>,
    manifest_path: PathBuf,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        cli: Arc<dyn ComposeCli>,
        options: &OrchestratorOptions,
    ) -> Self {
        Self {
            registry,
            cli,
            reporter: Arc::new(QuietReporter),
            manifest_path: options.manifest_path.clone(),
            grace: options.stop_grace,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Stop everything: local processes first, then the container stack.
    #[tracing::instrument(skip(self), fields(manifest = %self.manifest_path.display()))]
    pub async fn shutdown(&self) -> StopReport {
        let started = Instant::now();
        let manifest = self.load_manifest();
        let container_services: HashSet<String> = manifest
            .as_ref()
            .map(|m| m.service_names().into_iter().collect())
            .unwrap_or_default();

        let (local, attached): (Vec<_>, Vec<_>) = self
            .registry
            .drain()
            .into_iter()
            .partition(|p| !is_container_backed(p, &container_services));

        let (stopped_processes, process_errors) = self.stop_processes(local).await;
        let docker = match &manifest {
            Some(manifest) => self.stop_stack(manifest, attached).await,
            None => {
                // No stack on disk; attachers (if any) are just processes.
                let (_, errors) = self.stop_processes(attached).await;
                DockerStopReport {
                    errors,
                    ..DockerStopReport::default()
                }
            }
        };

        self.report(stopped_processes, process_errors, docker, started)
    }

    /// Tear down only the container stack described by the manifest on disk.
    pub async fn shutdown_stack(&self) -> StopReport {
        let started = Instant::now();
        let docker = match self.load_manifest() {
            Some(manifest) => {
                let attached: Vec<ManagedProcess> = self
                    .registry
                    .drain()
                    .into_iter()
                    .filter(|p| p.kind() == ProcessKind::ContainerLogs)
                    .collect();
                self.stop_stack(&manifest, attached).await
            }
            None => {
                self.reporter.status(&format!(
                    "No container manifest at {}, nothing to tear down",
                    self.manifest_path.display()
                ));
                DockerStopReport::default()
            }
        };
        self.report(0, Vec::new(), docker, started)
    }

    fn report(
        &self,
        stopped_processes: usize,
        process_errors: Vec<StopRecord>,
        docker: DockerStopReport,
        started: Instant,
    ) -> StopReport {
        let mut report = StopReport {
            stopped_processes,
            process_errors,
            docker,
            elapsed_ms: started.elapsed().as_millis() as u64,
            success: false,
        };
        report.success = report.error_count() == 0;
        tracing::info!(
            stopped = report.stopped_processes,
            containers = report.docker.stopped.len(),
            skipped = report.docker.skipped.len(),
            errors = report.error_count(),
            elapsed_ms = report.elapsed_ms,
            "shutdown complete"
        );
        report
    }

    fn load_manifest(&self) -> Option<ComposeManifest> {
        if !self.manifest_path.exists() {
            return None;
        }
        match ComposeManifest::load(&self.manifest_path) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!(
                    "Ignoring unreadable manifest {}: {}",
                    self.manifest_path.display(),
                    e
                );
                None
            }
        }
    }

    async fn stop_processes(&self, processes: Vec<ManagedProcess>) -> (usize, Vec<StopRecord>) {
        let grace = self.grace;
        let results = futures::future::join_all(processes.iter().map(|process| async move {
            (process, process.handle().stop(grace).await)
        }))
        .await;

        let mut stopped = 0;
        let mut errors = Vec::new();
        for (process, result) in results {
            match result {
                Ok(info) => {
                    tracing::debug!(service = %process.name(), exit = ?info, "process stopped");
                    stopped += 1;
                }
                Err(e) => {
                    tracing::warn!(service = %process.name(), "failed to stop: {}", e);
                    errors.push(
                        StopRecord::new(process.name(), StopKind::Process).with_message(e.to_string()),
                    );
                }
            }
        }
        (stopped, errors)
    }

    async fn stop_stack(&self, manifest: &ComposeManifest, attached: Vec<ManagedProcess>) -> DockerStopReport {
        let mut report = DockerStopReport::default();

        // Log attachers exit on their own once containers stop, but stopping
        // them first keeps `down` output out of the service streams.
        let (_, attach_errors) = self.stop_processes(attached).await;
        report.errors.extend(attach_errors);

        let services = manifest.service_names();
        let lookups = futures::future::join_all(services.iter().map(|service| async move {
            (service, self.cli.container_id(&self.manifest_path, service).await)
        }))
        .await;

        let mut planned = Vec::new();
        for (service, lookup) in lookups {
            let record = StopRecord::new(service.clone(), stop_kind(service));
            match lookup {
                Ok(Some(_)) => planned.push(record),
                Ok(None) => report
                    .skipped
                    .push(record.with_message("no container")),
                // Unknown state: still worth a `down`.
                Err(e) => {
                    tracing::debug!(service = %service, "container lookup failed: {}", e);
                    planned.push(record);
                }
            }
        }

        self.reporter.status("Stopping container stack...");
        match self.cli.down(&self.manifest_path).await {
            Ok(outcome) if outcome.success => report.stopped.extend(planned),
            Ok(outcome) => {
                let message = format!(
                    "compose down exited with {}",
                    outcome
                        .exit_code
                        .map_or_else(|| "a signal".to_string(), |c| c.to_string())
                );
                tracing::error!("{}:\n{}", message, outcome.output);
                report
                    .errors
                    .extend(planned.into_iter().map(|r| r.with_message(message.clone())));
            }
            Err(e) => {
                tracing::error!("compose down failed: {}", e);
                let message = e.to_string();
                report
                    .errors
                    .extend(planned.into_iter().map(|r| r.with_message(message.clone())));
            }
        }
        report
    }
}

fn is_container_backed(process: &ManagedProcess, container_services: &HashSet<String>) -> bool {
    process.kind() == ProcessKind::ContainerLogs || container_services.contains(process.name())
}

fn stop_kind(service: &str) -> StopKind {
    if InfraKind::ALL.iter().any(|k| k.service_name() == service) {
        StopKind::InfraDocker
    } else {
        StopKind::PlannedDocker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infra_services_are_classified() {
        assert_eq!(stop_kind("cache"), StopKind::InfraDocker);
        assert_eq!(stop_kind("api"), StopKind::PlannedDocker);
    }

    #[test]
    fn report_display() {
        let report = StopReport {
            stopped_processes: 2,
            process_errors: Vec::new(),
            docker: DockerStopReport {
                stopped: vec![StopRecord::new("cache", StopKind::InfraDocker)],
                skipped: Vec::new(),
                errors: Vec::new(),
            },
            elapsed_ms: 42,
            success: true,
        };
        assert_eq!(
            report.to_string(),
            "stopped 2 process(es), 1 container service(s) (0 skipped), 0 error(s) in 42ms"
        );
    }

    #[test]
    fn records_serialize_kebab_case() {
        let record = StopRecord::new("api", StopKind::PlannedDocker);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"service":"api","kind":"planned-docker"}"#);
    }
}
