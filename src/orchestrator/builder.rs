use super::Orchestrator;
use crate::compose::{ComposeCli, DockerComposeCli};
use crate::config::WorkspaceConfig;
use crate::error::{Error, Result};
use crate::framework::{FrameworkDetector, ManifestDetector};
use crate::install::{CommandExecutor, DependencyInstaller, ShellExecutor};
use crate::reporter::{QuietReporter, Reporter};
use crate::service::ProcessRegistry;
use crate::starter::{platform_launcher, LocalServiceStarter, TerminalLauncher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Builder for constructing an [`Orchestrator`] with a fluent API.
///
/// Only the configuration is required. The seams (command executor, compose
/// CLI, terminal launcher, framework detector, reporter) default to the real
/// implementations and can be swapped for test doubles.
///
/// # Example
///
/// ```no_run
/// use stackup::{Orchestrator, WorkspaceConfig};
///
/// # fn example() -> Result<(), stackup::Error> {
/// let orchestrator = Orchestrator::builder()
///     .config(WorkspaceConfig::default())
///     .work_dir("/src/workspace")
///     .skip_install(true)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct OrchestratorBuilder {
    config: Option<WorkspaceConfig>,
    work_dir: Option<PathBuf>,
    config_dir: Option<PathBuf>,
    skip_install: Option<bool>,
    concurrency: Option<usize>,
    registry: Option<Arc<ProcessRegistry>>,
    executor: Option<Arc<dyn CommandExecutor>>,
    compose: Option<Arc<dyn ComposeCli>>,
    launcher: Option<Arc<dyn TerminalLauncher>>,
    detector: Option<Arc<dyn FrameworkDetector>>,
    reporter: Option<Arc<dyn Reporter>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            work_dir: None,
            config_dir: None,
            skip_install: None,
            concurrency: None,
            registry: None,
            executor: None,
            compose: None,
            launcher: None,
            detector: None,
            reporter: None,
        }
    }

    /// Set the configuration. Required.
    pub fn config(mut self, config: WorkspaceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Directory the manifest path is resolved against and compose runs in.
    ///
    /// Defaults to the current directory.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Directory relative repository paths are resolved against.
    ///
    /// Defaults to the working directory.
    pub fn config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    /// Override `options.skip_install` from the config.
    pub fn skip_install(mut self, skip: bool) -> Self {
        self.skip_install = Some(skip);
        self
    }

    /// Override `options.concurrency` from the config.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn registry(mut self, registry: Arc<ProcessRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn compose(mut self, compose: Arc<dyn ComposeCli>) -> Self {
        self.compose = Some(compose);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn TerminalLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn FrameworkDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Validate the configuration and wire up the orchestrator.
    pub fn build(self) -> Result<Orchestrator> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("orchestrator requires a configuration".to_string()))?;
        config.validate()?;

        let work_dir = self.work_dir.unwrap_or_else(|| PathBuf::from("."));
        let mut options = config.orchestrator_options(&work_dir);
        if let Some(skip) = self.skip_install {
            options.skip_install = skip;
        }
        if let Some(concurrency) = self.concurrency {
            if concurrency == 0 {
                return Err(Error::Validation("concurrency must be at least 1".to_string()));
            }
            options.concurrency = concurrency;
        }

        let config_dir = self.config_dir.unwrap_or_else(|| work_dir.clone());
        let targets = config.targets(&config_dir);
        let registry = self.registry.unwrap_or_default();
        let reporter: Arc<dyn Reporter> = self.reporter.unwrap_or_else(|| Arc::new(QuietReporter));
        let detector: Arc<dyn FrameworkDetector> =
            self.detector.unwrap_or_else(|| Arc::new(ManifestDetector));
        let executor: Arc<dyn CommandExecutor> =
            self.executor.unwrap_or_else(|| Arc::new(ShellExecutor));
        let launcher = self.launcher.unwrap_or_else(platform_launcher);
        let compose: Arc<dyn ComposeCli> = self.compose.unwrap_or_else(|| {
            Arc::new(DockerComposeCli::new(options.project.clone(), work_dir.clone()))
        });
        let cancel = CancellationToken::new();

        let installer = DependencyInstaller::new(options.clone())
            .with_executor(executor)
            .with_detector(Arc::clone(&detector))
            .with_reporter(Arc::clone(&reporter))
            .with_cancel(cancel.clone());
        let starter = LocalServiceStarter::new(options.clone(), Arc::clone(&registry))
            .with_detector(detector)
            .with_launcher(launcher)
            .with_reporter(Arc::clone(&reporter))
            .with_cancel(cancel.clone());

        tracing::debug!(
            repos = targets.len(),
            infra = config.infra.len(),
            concurrency = options.concurrency,
            manifest = %options.manifest_path.display(),
            "orchestrator configured"
        );

        Ok(Orchestrator {
            options,
            targets,
            infra: config.infra,
            infra_env: config.infra_env,
            registry,
            installer,
            starter,
            compose,
            reporter,
            cancel,
            stop_report: OnceCell::new(),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
