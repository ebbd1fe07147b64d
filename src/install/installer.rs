use super::executor::{CommandExecutor, ShellExecutor};
use crate::classify::InstallErrorKind;
use crate::config::{ExecutionMode, OrchestratorOptions, RepoTarget};
use crate::framework::{FrameworkDetector, ManifestDetector};
use crate::reporter::{QuietReporter, Reporter};
use crate::runner::{run_bounded, RunOptions, TaskError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Lines of command output kept in a failure message.
const FAILURE_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    SkipFlag,
    ContainerMode,
    AlreadyInstalled,
    NothingToInstall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandSource {
    Configured,
    Detected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallDecision {
    Skip(SkipReason),
    Run {
        command: String,
        source: CommandSource,
    },
}

/// A repository whose install did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallFailure {
    pub name: String,
    pub kind: InstallErrorKind,
    pub message: String,
    pub attempts: u32,
}

impl fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.kind, self.message)
    }
}

impl InstallFailure {
    pub fn suggestions(&self) -> &'static [&'static str] {
        self.kind.suggestions()
    }
}

/// Partition of the input targets: every target lands in exactly one side.
#[derive(Debug, Clone, Default)]
pub struct InstallOutcome {
    pub ready_services: Vec<RepoTarget>,
    pub install_failures: Vec<InstallFailure>,
}

impl InstallOutcome {
    pub fn ready_names(&self) -> Vec<&str> {
        self.ready_services.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.install_failures.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Installs repository dependencies with bounded concurrency and retry.
///
/// Cheap to clone; clones share the executor, reporter and the record of
/// repositories already installed by this instance.
#[derive(Clone)]
pub struct DependencyInstaller {
    options: Arc<OrchestratorOptions>,
    executor: Arc<dyn CommandExecutor>,
    detector: Arc<dyn FrameworkDetector>,
    reporter: Arc<dyn Reporter>,
    installed: Arc<Mutex<HashSet<String>>>,
    cancel: Option<CancellationToken>,
}

impl DependencyInstaller {
    pub fn new(options: OrchestratorOptions) -> Self {
        Self {
            options: Arc::new(options),
            executor: Arc::new(ShellExecutor),
            detector: Arc::new(ManifestDetector),
            reporter: Arc::new(QuietReporter),
            installed: Arc::new(Mutex::new(HashSet::new())),
            cancel: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn FrameworkDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Whether `target` needs an install, and with which command.
    pub fn decide(&self, target: &RepoTarget) -> InstallDecision {
        if self.options.skip_install {
            return InstallDecision::Skip(SkipReason::SkipFlag);
        }
        if target.mode == ExecutionMode::Container {
            return InstallDecision::Skip(SkipReason::ContainerMode);
        }
        if self.installed.lock().contains(&target.name) {
            return InstallDecision::Skip(SkipReason::AlreadyInstalled);
        }
        if let Some(command) = &target.install_command {
            return InstallDecision::Run {
                command: command.clone(),
                source: CommandSource::Configured,
            };
        }
        match self
            .detector
            .detect(&target.path)
            .and_then(|info| info.install_command)
        {
            Some(command) => InstallDecision::Run {
                command,
                source: CommandSource::Detected,
            },
            None => InstallDecision::Skip(SkipReason::NothingToInstall),
        }
    }

    /// Install every target, at most `concurrency` at a time.
    #[tracing::instrument(skip_all, fields(targets = targets.len()))]
    pub async fn install_all(&self, targets: Vec<RepoTarget>) -> InstallOutcome {
        let total = targets.len();
        let names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();
        let completed = Arc::new(AtomicUsize::new(0));

        let mut run_options =
            RunOptions::new(self.options.concurrency).with_timeout(self.options.install_timeout);
        if let Some(cancel) = &self.cancel {
            run_options = run_options.with_cancel(cancel.clone());
        }

        let installer = self.clone();
        let counter = Arc::clone(&completed);
        let results = run_bounded(targets, &run_options, move |target| {
            let installer = installer.clone();
            let counter = Arc::clone(&counter);
            async move {
                let result = installer.install_one(&target).await;
                let done = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let verdict = if result.is_ok() { "ready" } else { "failed" };
                tracing::info!("[{}/{}] {} {}", done, total, target.name, verdict);
                result.map(|()| target)
            }
        })
        .await;

        let mut outcome = InstallOutcome::default();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(target) => outcome.ready_services.push(target),
                Err(TaskError::Failed(failure)) => outcome.install_failures.push(failure),
                Err(err) => {
                    let kind = if err.is_timeout() {
                        InstallErrorKind::Timeout
                    } else {
                        InstallErrorKind::Unknown
                    };
                    let failure = InstallFailure {
                        name,
                        kind,
                        message: err.to_string(),
                        attempts: if matches!(err, TaskError::Aborted) { 0 } else { 1 },
                    };
                    self.report_failure(&failure);
                    outcome.install_failures.push(failure);
                }
            }
        }

        tracing::info!(
            ready = outcome.ready_services.len(),
            failed = outcome.install_failures.len(),
            "install phase complete"
        );
        outcome
    }

    /// Install a single target, retrying transient failures.
    pub async fn install_one(&self, target: &RepoTarget) -> std::result::Result<(), InstallFailure> {
        let (command, source) = match self.decide(target) {
            InstallDecision::Skip(reason) => {
                tracing::debug!(repo = %target.name, ?reason, "skipping install");
                return Ok(());
            }
            InstallDecision::Run { command, source } => (command, source),
        };

        let policy = self.options.retry;
        let max_attempts = policy.max_attempts();
        self.reporter
            .status(&format!("Installing {} ({})", target.name, command));
        tracing::debug!(repo = %target.name, %command, ?source, "running install");

        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return Err(InstallFailure {
                    name: target.name.clone(),
                    kind: InstallErrorKind::Unknown,
                    message: "operation aborted".to_string(),
                    attempts: attempt - 1,
                });
            }

            let (kind, message) = match self.executor.run(&command, &target.path, &target.env).await {
                Ok(output) if output.success() => {
                    self.installed.lock().insert(target.name.clone());
                    self.reporter.success(&format!("{} installed", target.name));
                    return Ok(());
                }
                Ok(output) => (
                    InstallErrorKind::classify_exit(output.exit_code, &output.output),
                    tail(&output.output, FAILURE_TAIL_LINES),
                ),
                Err(e) => (spawn_error_kind(&e), e.to_string()),
            };

            if !kind.is_retryable() || attempt >= max_attempts {
                let failure = InstallFailure {
                    name: target.name.clone(),
                    kind,
                    message,
                    attempts: attempt,
                };
                self.report_failure(&failure);
                return Err(failure);
            }

            let delay = policy.delay_for(attempt);
            tracing::warn!(
                repo = %target.name,
                %kind,
                "install attempt {}/{} failed, retrying in {:?}",
                attempt,
                max_attempts,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn report_failure(&self, failure: &InstallFailure) {
        tracing::error!(
            repo = %failure.name,
            kind = %failure.kind,
            attempts = failure.attempts,
            "install failed: {}",
            failure.message
        );
        self.reporter.error(&format!(
            "Install failed for {} ({})",
            failure.name, failure.kind
        ));
        for suggestion in failure.suggestions() {
            self.reporter.suggestion(suggestion);
        }
    }
}

fn spawn_error_kind(err: &std::io::Error) -> InstallErrorKind {
    match err.kind() {
        std::io::ErrorKind::NotFound => InstallErrorKind::CommandNotFound,
        std::io::ErrorKind::PermissionDenied => InstallErrorKind::Permission,
        std::io::ErrorKind::TimedOut => InstallErrorKind::Timeout,
        _ => InstallErrorKind::classify(&err.to_string()),
    }
}

fn tail(output: &str, lines: usize) -> String {
    let all: Vec<&str> = output.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::framework::{FrameworkInfo, FrameworkType};
    use crate::install::CommandOutput;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;

    struct Scripted {
        outputs: Mutex<Vec<CommandOutput>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outputs: Vec<CommandOutput>) -> Arc<Self> {
            Arc::new(Self {
                outputs: Mutex::new(outputs),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CommandExecutor for Scripted {
        async fn run(
            &self,
            _command: &str,
            _cwd: &Path,
            _env: &HashMap<String, String>,
        ) -> std::io::Result<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outputs = self.outputs.lock();
            Ok(if outputs.len() > 1 {
                outputs.remove(0)
            } else {
                outputs[0].clone()
            })
        }
    }

    struct FixedDetector(Option<&'static str>);

    impl FrameworkDetector for FixedDetector {
        fn detect(&self, _repo: &Path) -> Option<FrameworkInfo> {
            self.0.map(|cmd| FrameworkInfo {
                kind: FrameworkType::Backend,
                name: "Test".into(),
                version: None,
                startup_command: None,
                install_command: Some(cmd.to_string()),
                build_command: None,
                default_port: None,
                health_check_path: None,
            })
        }
    }

    fn fast_options() -> OrchestratorOptions {
        OrchestratorOptions {
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            ..OrchestratorOptions::default()
        }
    }

    fn fail(code: i32, output: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(code),
            output: output.to_string(),
        }
    }

    fn ok() -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            output: String::new(),
        }
    }

    #[test]
    fn decision_order() {
        let installer = DependencyInstaller::new(fast_options())
            .with_detector(Arc::new(FixedDetector(Some("pip install -r requirements.txt"))));

        let container = RepoTarget::new("c", "/tmp/c", ExecutionMode::Container).with_install("npm ci");
        assert_eq!(
            installer.decide(&container),
            InstallDecision::Skip(SkipReason::ContainerMode)
        );

        let explicit = RepoTarget::new("e", "/tmp/e", ExecutionMode::Local).with_install("npm ci");
        assert_eq!(
            installer.decide(&explicit),
            InstallDecision::Run {
                command: "npm ci".into(),
                source: CommandSource::Configured
            }
        );

        let detected = RepoTarget::new("d", "/tmp/d", ExecutionMode::Local);
        assert!(matches!(
            installer.decide(&detected),
            InstallDecision::Run {
                source: CommandSource::Detected,
                ..
            }
        ));
    }

    #[test]
    fn skip_flag_wins() {
        let options = OrchestratorOptions {
            skip_install: true,
            ..fast_options()
        };
        let installer = DependencyInstaller::new(options);
        let target = RepoTarget::new("api", "/tmp/api", ExecutionMode::Local).with_install("npm ci");
        assert_eq!(installer.decide(&target), InstallDecision::Skip(SkipReason::SkipFlag));
    }

    #[test]
    fn nothing_detected_means_nothing_to_install() {
        let installer =
            DependencyInstaller::new(fast_options()).with_detector(Arc::new(FixedDetector(None)));
        let target = RepoTarget::new("web", "/tmp/web", ExecutionMode::Local);
        assert_eq!(
            installer.decide(&target),
            InstallDecision::Skip(SkipReason::NothingToInstall)
        );
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let executor = Scripted::new(vec![fail(1, "npm ERR! code ECONNRESET"), ok()]);
        let installer = DependencyInstaller::new(fast_options()).with_executor(executor.clone());
        let target = RepoTarget::new("api", "/tmp/api", ExecutionMode::Local).with_install("npm ci");

        installer.install_one(&target).await.unwrap();
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_failure_stops_immediately() {
        let executor = Scripted::new(vec![fail(1, "npm ERR! code EJSONPARSE")]);
        let installer = DependencyInstaller::new(fast_options()).with_executor(executor.clone());
        let target = RepoTarget::new("api", "/tmp/api", ExecutionMode::Local).with_install("npm ci");

        let failure = installer.install_one(&target).await.unwrap_err();
        assert_eq!(failure.kind, InstallErrorKind::Syntax);
        assert_eq!(failure.attempts, 1);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exit_127_is_command_not_found() {
        let executor = Scripted::new(vec![fail(127, "sh: 1: pnpm: not found")]);
        let installer = DependencyInstaller::new(fast_options()).with_executor(executor);
        let target = RepoTarget::new("api", "/tmp/api", ExecutionMode::Local).with_install("pnpm i");

        let failure = installer.install_one(&target).await.unwrap_err();
        assert_eq!(failure.kind, InstallErrorKind::CommandNotFound);
    }

    struct Hanging;

    #[async_trait]
    impl CommandExecutor for Hanging {
        async fn run(
            &self,
            _command: &str,
            _cwd: &Path,
            _env: &HashMap<String, String>,
        ) -> std::io::Result<CommandOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(CommandOutput {
                exit_code: Some(0),
                output: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn runner_timeout_becomes_timeout_failure() {
        let options = OrchestratorOptions {
            install_timeout: Some(Duration::from_millis(50)),
            ..fast_options()
        };
        let installer = DependencyInstaller::new(options).with_executor(Arc::new(Hanging));
        let target = RepoTarget::new("api", "/tmp/api", ExecutionMode::Local).with_install("npm ci");

        let outcome = installer.install_all(vec![target]).await;

        assert!(outcome.ready_services.is_empty());
        let failure = &outcome.install_failures[0];
        assert_eq!(failure.name, "api");
        assert_eq!(failure.kind, InstallErrorKind::Timeout);
        assert_eq!(failure.attempts, 1);
        assert!(failure.message.contains("timed out"), "{}", failure.message);
        assert_eq!(
            failure.to_string(),
            format!("api (timeout): {}", failure.message)
        );
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("", 5), "");
    }
}
