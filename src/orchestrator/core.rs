use crate::compose::{
    ComposeBuilder, ComposeCli, ComposeManifest, ContainerServiceSpec, ContainerStackRunner,
    HealthOptions, HealthRecord, InfraKind, StackState,
};
use crate::config::{ExecutionMode, OrchestratorOptions, RepoTarget};
use crate::docker::DockerError;
use crate::error::{Error, Result};
use crate::install::{DependencyInstaller, InstallOutcome};
use crate::reporter::Reporter;
use crate::service::ProcessRegistry;
use crate::shutdown::{ShutdownCoordinator, StopReport};
use crate::starter::{LocalServiceStarter, StartCommand, StartOutcome};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// What `up` would do, without doing it.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Local-mode repositories and the command each would start with.
    pub local: Vec<(RepoTarget, StartCommand)>,
    /// Container-mode repositories with a Dockerfile.
    pub containers: Vec<ContainerServiceSpec>,
    /// Container-mode repositories without a Dockerfile.
    pub missing_dockerfiles: Vec<String>,
    /// `None` when nothing needs the container stack.
    pub manifest: Option<ComposeManifest>,
}

/// Result of the container lane.
#[derive(Debug, Default)]
pub struct StackReport {
    pub services: Vec<String>,
    pub state: Option<StackState>,
    pub health: Vec<HealthRecord>,
    pub missing_dockerfiles: Vec<String>,
    /// The fatal error that ended the lane, if any.
    pub error: Option<Error>,
}

/// Everything one `up` produced.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub install: InstallOutcome,
    pub start: StartOutcome,
    /// `None` when no infra or container-mode repository was configured.
    pub stack: Option<StackReport>,
}

impl RunSummary {
    /// A container phase failed; the stack is not usable.
    pub fn is_fatal(&self) -> bool {
        self.stack.as_ref().is_some_and(|s| s.error.is_some())
    }

    /// Any repository failed to install, start or containerize.
    pub fn has_failures(&self) -> bool {
        self.is_fatal()
            || !self.install.install_failures.is_empty()
            || !self.start.failed_services.is_empty()
            || self
                .stack
                .as_ref()
                .is_some_and(|s| !s.missing_dockerfiles.is_empty())
    }
}

/// Runs the local lane (install → start) and the container lane
/// (synthesize → build → start → wait healthy) side by side, over one shared
/// [`ProcessRegistry`], and tears both down on shutdown.
///
/// # Concurrency Model
///
/// - All methods take `&self`
/// - `shutdown()` cancels in-flight lanes and runs exactly once; concurrent
///   callers all receive the same report
/// - The registry is the only mutable state shared between lanes
///
/// # Example
///
/// ```no_run
/// use stackup::{Orchestrator, Parser};
///
/// # async fn example() -> Result<(), stackup::Error> {
/// let config = Parser::new().load_config("stackup.yaml")?;
/// let orchestrator = Orchestrator::builder()
///     .config(config)
///     .work_dir(".")
///     .build()?;
///
/// let summary = orchestrator.up().await;
/// println!("{} service(s) running", orchestrator.registry().len());
///
/// if summary.has_failures() {
///     eprintln!("some repositories did not come up");
/// }
///
/// let report = orchestrator.shutdown().await;
/// println!("{}", report);
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    pub(super) options: OrchestratorOptions,
    pub(super) targets: Vec<RepoTarget>,
    pub(super) infra: BTreeSet<InfraKind>,
    pub(super) infra_env: BTreeMap<InfraKind, BTreeMap<String, String>>,
    pub(super) registry: Arc<ProcessRegistry>,
    pub(super) installer: DependencyInstaller,
    pub(super) starter: LocalServiceStarter,
    pub(super) compose: Arc<dyn ComposeCli>,
    pub(super) reporter: Arc<dyn Reporter>,
    pub(super) cancel: CancellationToken,
    pub(super) stop_report: OnceCell<StopReport>,
}

impl Orchestrator {
    pub fn builder() -> super::OrchestratorBuilder {
        super::OrchestratorBuilder::new()
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn targets(&self) -> &[RepoTarget] {
        &self.targets
    }

    /// The shared registry of running services, for status and log views.
    pub fn registry(&self) -> Arc<ProcessRegistry> {
        Arc::clone(&self.registry)
    }

    /// Token cancelled when shutdown begins.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn partition_targets(&self) -> (Vec<RepoTarget>, Vec<RepoTarget>) {
        self.targets
            .iter()
            .cloned()
            .partition(|t| t.mode == ExecutionMode::Local)
    }

    /// Resolve start commands and synthesize the manifest without side effects.
    pub fn plan(&self) -> Result<Plan> {
        let (local, container) = self.partition_targets();
        let local = local
            .into_iter()
            .map(|target| {
                let command = self.starter.resolve(&target);
                (target, command)
            })
            .collect();

        let (containers, missing_dockerfiles) = ContainerServiceSpec::detect_all(&container);
        let manifest = if self.infra.is_empty() && containers.is_empty() {
            None
        } else {
            Some(
                ComposeBuilder::new(self.options.network.clone())
                    .with_infra_env(self.infra_env.clone())
                    .build(&self.infra, &containers)?,
            )
        };

        Ok(Plan {
            local,
            containers,
            missing_dockerfiles,
            manifest,
        })
    }

    /// Bring up every repository.
    ///
    /// Per-repository failures land in the summary; a failed container phase
    /// is recorded as the stack report's error.
    #[tracing::instrument(skip(self), fields(repos = self.targets.len(), infra = self.infra.len()))]
    pub async fn up(&self) -> RunSummary {
        let (local, container) = self.partition_targets();

        let local_lane = async {
            if local.is_empty() {
                return (InstallOutcome::default(), StartOutcome::default());
            }
            self.reporter
                .status(&format!("Installing dependencies for {} repositories...", local.len()));
            let install = self.installer.install_all(local).await;
            if install.ready_services.is_empty() {
                return (install, StartOutcome::default());
            }
            self.reporter.status("Starting local services...");
            let start = self.starter.start_all(install.ready_services.clone()).await;
            (install, start)
        };

        let container_lane = async {
            tokio::select! {
                report = self.run_stack(&container) => report,
                _ = self.cancel.cancelled() => Some(StackReport {
                    error: Some(Error::Aborted),
                    ..StackReport::default()
                }),
            }
        };

        let ((install, start), stack) = tokio::join!(local_lane, container_lane);
        RunSummary {
            install,
            start,
            stack,
        }
    }

    async fn run_stack(&self, container: &[RepoTarget]) -> Option<StackReport> {
        let (specs, missing_dockerfiles) = ContainerServiceSpec::detect_all(container);
        for name in &missing_dockerfiles {
            self.reporter.error(&format!(
                "{} is in container mode but has no Dockerfile or Dockerfile.dev",
                name
            ));
        }
        if self.infra.is_empty() && specs.is_empty() {
            return if missing_dockerfiles.is_empty() {
                None
            } else {
                Some(StackReport {
                    missing_dockerfiles,
                    ..StackReport::default()
                })
            };
        }

        let mut report = StackReport {
            missing_dockerfiles,
            ..StackReport::default()
        };

        let manifest = match ComposeBuilder::new(self.options.network.clone())
            .with_infra_env(self.infra_env.clone())
            .build(&self.infra, &specs)
            .and_then(|manifest| {
                manifest.write(&self.options.manifest_path)?;
                Ok(manifest)
            }) {
            Ok(manifest) => manifest,
            Err(e) => {
                report.error = Some(e);
                return Some(report);
            }
        };
        report.services = manifest.service_names();
        tracing::info!(
            path = %self.options.manifest_path.display(),
            services = ?report.services,
            "compose manifest written"
        );

        if !self.compose.daemon_available().await {
            report.error = Some(Error::Docker(DockerError::DaemonUnavailable));
            return Some(report);
        }

        let runner = ContainerStackRunner::new(
            Arc::clone(&self.compose),
            Arc::clone(&self.registry),
            Arc::clone(&self.reporter),
            HealthOptions {
                interval: self.options.health_interval,
                timeout: self.options.health_timeout,
            },
            self.options.project.clone(),
        );
        let result = runner
            .run(&self.options.manifest_path, &report.services)
            .await;
        report.state = Some(runner.state());
        report.health = runner.health_records();
        if let Err(e) = result {
            tracing::error!("container stack failed: {}", e);
            report.error = Some(e);
        }
        Some(report)
    }

    /// Stop everything. Runs once; later calls return the first report.
    pub async fn shutdown(&self) -> StopReport {
        self.cancel.cancel();
        self.stop_report
            .get_or_init(|| async {
                self.reporter.status("Shutting down...");
                self.coordinator().shutdown().await
            })
            .await
            .clone()
    }

    /// Tear down a container stack left on disk by a previous run.
    pub async fn down(&self) -> StopReport {
        self.coordinator().shutdown_stack().await
    }

    fn coordinator(&self) -> ShutdownCoordinator {
        ShutdownCoordinator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.compose),
            &self.options,
        )
        .with_reporter(Arc::clone(&self.reporter))
    }
}
