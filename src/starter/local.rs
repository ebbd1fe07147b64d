use super::command::{resolve_start_command, validate_package_script, StartCommand};
use super::terminal::{platform_launcher, TerminalLauncher};
use crate::config::{ExecutionMode, OrchestratorOptions, RepoTarget};
use crate::error::{Error, Result};
use crate::framework::{FrameworkDetector, ManifestDetector};
use crate::reporter::{QuietReporter, Reporter};
use crate::runner::{run_bounded, RunOptions, TaskError};
use crate::service::{ManagedProcess, OutputStream, ProcessHandle, ProcessKind, ProcessRegistry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Output lines quoted in the log when a service exits unsuccessfully.
const CRASH_CONTEXT_LINES: usize = 10;

/// A repository that could not be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartFailure {
    pub name: String,
    pub message: String,
    pub suggestions: Vec<String>,
}

/// Partition of the started targets into launched processes and failures.
#[derive(Debug, Default)]
pub struct StartOutcome {
    pub processes: Vec<ManagedProcess>,
    pub failed_services: Vec<StartFailure>,
}

impl StartOutcome {
    pub fn process_names(&self) -> Vec<&str> {
        self.processes.iter().map(|p| p.name()).collect()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed_services.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Processes spawned during one `start_all` pass.
///
/// Once the pass is closed, a worker that finishes late stops its own process
/// instead of handing it to a caller that is no longer listening.
#[derive(Default)]
struct SpawnLedger {
    closed: bool,
    spawned: HashMap<String, ManagedProcess>,
}

/// Launches local-mode repositories and publishes them to the registry.
#[derive(Clone)]
pub struct LocalServiceStarter {
    options: Arc<OrchestratorOptions>,
    registry: Arc<ProcessRegistry>,
    detector: Arc<dyn FrameworkDetector>,
    launcher: Arc<dyn TerminalLauncher>,
    reporter: Arc<dyn Reporter>,
    cancel: Option<CancellationToken>,
}

impl LocalServiceStarter {
    pub fn new(options: OrchestratorOptions, registry: Arc<ProcessRegistry>) -> Self {
        Self {
            options: Arc::new(options),
            registry,
            detector: Arc::new(ManifestDetector),
            launcher: platform_launcher(),
            reporter: Arc::new(QuietReporter),
            cancel: None,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn FrameworkDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn TerminalLauncher>) -> Self {
        self.launcher = launcher;
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

    pub fn resolve(&self, target: &RepoTarget) -> StartCommand {
        resolve_start_command(target, self.detector.as_ref())
    }

    /// Start every target, then publish the launched processes in one batch.
    #[tracing::instrument(skip_all, fields(targets = targets.len()))]
    pub async fn start_all(&self, targets: Vec<RepoTarget>) -> StartOutcome {
        let names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();

        let mut run_options =
            RunOptions::new(self.options.concurrency).with_timeout(self.options.start_timeout);
        if let Some(cancel) = &self.cancel {
            run_options = run_options.with_cancel(cancel.clone());
        }

        let ledger = Arc::new(Mutex::new(SpawnLedger::default()));
        let starter = self.clone();
        let worker_ledger = Arc::clone(&ledger);
        let results = run_bounded(targets, &run_options, move |target| {
            let starter = starter.clone();
            let ledger = Arc::clone(&worker_ledger);
            async move {
                let process = starter.start_one(&target).await?;
                let accepted = {
                    let mut ledger = ledger.lock();
                    if !ledger.closed {
                        ledger.spawned.insert(target.name.clone(), process.clone());
                    }
                    !ledger.closed
                };
                if accepted {
                    return Ok(process);
                }
                starter.discard(&process).await;
                Err(Error::ServiceStartFailed(
                    target.name.clone(),
                    "started after the start phase ended".to_string(),
                ))
            }
        })
        .await;

        // Timed-out items may still have spawned; nothing will publish them.
        let orphans: Vec<ManagedProcess> = {
            let mut ledger = ledger.lock();
            ledger.closed = true;
            let orphans = names
                .iter()
                .zip(&results)
                .filter(|(_, result)| matches!(result, Err(TaskError::TimedOut(_))))
                .filter_map(|(name, _)| ledger.spawned.remove(name))
                .collect::<Vec<_>>();
            orphans
        };
        for process in &orphans {
            self.discard(process).await;
        }

        let mut outcome = StartOutcome::default();
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(process) => outcome.processes.push(process),
                Err(err) => {
                    let (message, suggestions) = match err {
                        TaskError::Failed(e) => (e.to_string(), e.suggestions()),
                        other => (other.to_string(), Vec::new()),
                    };
                    tracing::error!(service = %name, "failed to start: {}", message);
                    self.reporter
                        .error(&format!("{} failed to start: {}", name, message));
                    for suggestion in &suggestions {
                        self.reporter.suggestion(suggestion);
                    }
                    outcome.failed_services.push(StartFailure {
                        name,
                        message,
                        suggestions,
                    });
                }
            }
        }

        let published = self.registry.publish(outcome.processes.iter().cloned());
        tracing::info!(
            started = outcome.processes.len(),
            published,
            failed = outcome.failed_services.len(),
            "start phase complete"
        );
        outcome
    }

    /// Start a single target without publishing it.
    pub async fn start_one(&self, target: &RepoTarget) -> Result<ManagedProcess> {
        if target.mode == ExecutionMode::Container {
            return Err(Error::ServiceStartFailed(
                target.name.clone(),
                "container-mode services are started with the container stack".to_string(),
            ));
        }

        let resolved = self.resolve(target);
        if let Some(info) = &resolved.framework {
            tracing::info!(service = %target.name, "Detected {}", info.describe());
        }
        tracing::debug!(
            service = %target.name,
            command = %resolved.command,
            source = ?resolved.source,
            "resolved start command"
        );

        let process = if resolved.is_frontend(target) {
            self.launch_terminal(target, &resolved.command)?
        } else {
            self.spawn_supervised(target, &resolved.command)?
        };

        tracing::info!(
            service = %target.name,
            pid = ?process.handle().pid(),
            kind = %process.kind(),
            "process spawned"
        );
        self.reporter
            .success(&format!("{} started ({})", target.name, resolved.command));
        self.watch_exit(&process);
        Ok(process)
    }

    /// Stop a process whose start result was dropped.
    async fn discard(&self, process: &ManagedProcess) {
        tracing::warn!(
            service = %process.name(),
            "stopping process that started after its start timeout"
        );
        if let Err(e) = process.handle().stop(self.options.stop_grace).await {
            tracing::warn!(service = %process.name(), "could not stop late process: {}", e);
        }
    }

    fn spawn_supervised(&self, target: &RepoTarget, command: &str) -> Result<ManagedProcess> {
        validate_package_script(target, command)?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("exec 2>&1\n{}", command))
            .current_dir(&target.path)
            .envs(&target.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::CommandNotFound(format!(
                "sh (starting {} in {})",
                target.name,
                target.path.display()
            )),
            _ => Error::ServiceStartFailed(target.name.clone(), e.to_string()),
        })?;

        let output = OutputStream::with_scanner(&target.name);
        output.annotate(format!("starting: {}", command));
        if let Some(stdout) = child.stdout.take() {
            output.spawn_reader(stdout, Some(Arc::clone(&self.reporter)));
        }

        let handle = ProcessHandle::supervise(child, ProcessKind::Supervised);
        Ok(ManagedProcess::new(&target.name, output, handle))
    }

    fn launch_terminal(&self, target: &RepoTarget, command: &str) -> Result<ManagedProcess> {
        let mut cmd = self.launcher.command(&target.name, &target.path, command)?;
        cmd.envs(&target.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn().map_err(|e| {
            Error::ServiceStartFailed(
                target.name.clone(),
                format!("{} launch failed: {}", self.launcher.name(), e),
            )
        })?;

        let output = OutputStream::new(&target.name);
        output.annotate(format!("launched in {}: {}", self.launcher.name(), command));
        output.annotate("output appears in the terminal window and is not captured");

        let handle = ProcessHandle::supervise(child, ProcessKind::Terminal);
        Ok(ManagedProcess::new(&target.name, output, handle))
    }

    /// Record the exit of `process`: log, annotate and deregister.
    fn watch_exit(&self, process: &ManagedProcess) {
        let registry = Arc::clone(&self.registry);
        let reporter = Arc::clone(&self.reporter);
        let process = process.clone();
        tokio::spawn(async move {
            let info = process.handle().wait().await;
            let name = process.name();

            if process.kind() == ProcessKind::Terminal {
                // The service keeps running in its window; only the launcher ended.
                if !info.success() {
                    tracing::warn!(service = %name, "terminal launcher exited with {}", info);
                }
                process
                    .output()
                    .annotate(format!("terminal launcher exited ({})", info));
                return;
            }

            registry.remove_instance(name, process.id());
            if let Some(err) = &info.error {
                tracing::error!(service = %name, "process error: {}", err);
                process.output().annotate(format!("process error: {}", err));
                reporter.error(&format!("{}: process error: {}", name, err));
                return;
            }

            process.output().annotate(format!("process exited ({})", info));
            if info.success() {
                tracing::info!(service = %name, "process exited ({})", info);
            } else {
                tracing::warn!(
                    service = %name,
                    "process exited ({}); last output:\n{}",
                    info,
                    process.output().tail_text(CRASH_CONTEXT_LINES)
                );
                reporter.warning(&format!("{} exited ({})", name, info));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::FrameworkInfo;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoFramework;

    impl FrameworkDetector for NoFramework {
        fn detect(&self, _repo: &Path) -> Option<FrameworkInfo> {
            None
        }
    }

    fn starter(registry: Arc<ProcessRegistry>) -> LocalServiceStarter {
        LocalServiceStarter::new(OrchestratorOptions::default(), registry)
            .with_detector(Arc::new(NoFramework))
    }

    #[tokio::test]
    async fn supervised_output_is_merged() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ProcessRegistry::new());
        let target = RepoTarget::new("api", dir.path(), ExecutionMode::Local)
            .with_startup("echo out; echo err >&2; sleep 30");

        let process = starter(Arc::clone(&registry)).start_one(&target).await.unwrap();
        assert_eq!(process.kind(), ProcessKind::Supervised);

        let mut seen: Vec<String> = Vec::new();
        for _ in 0..50 {
            seen = process.output().tail().into_iter().map(|l| l.text).collect();
            if seen.iter().any(|l| l == "err") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(seen.iter().any(|l| l == "out"), "{:?}", seen);
        assert!(seen.iter().any(|l| l == "err"), "{:?}", seen);

        process.handle().stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn exit_removes_from_registry() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ProcessRegistry::new());
        let target =
            RepoTarget::new("job", dir.path(), ExecutionMode::Local).with_startup("sleep 0.3; exit 3");

        let process = starter(Arc::clone(&registry)).start_one(&target).await.unwrap();
        registry.insert(process.clone());
        assert!(registry.contains("job"));

        let info = process.handle().wait().await;
        assert_eq!(info.code, Some(3));
        for _ in 0..50 {
            if !registry.contains("job") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!registry.contains("job"));
    }

    #[tokio::test]
    async fn missing_script_fails_fast() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"scripts":{"dev":"vite"}}"#).unwrap();
        let target = RepoTarget::new("web", dir.path(), ExecutionMode::Local).with_startup("npm run serve");

        let err = starter(Arc::new(ProcessRegistry::new()))
            .start_one(&target)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ScriptNotFound { .. }));
    }

    #[tokio::test]
    async fn container_targets_are_rejected() {
        let target = RepoTarget::new("svc", "/tmp", ExecutionMode::Container);
        let err = starter(Arc::new(ProcessRegistry::new()))
            .start_one(&target)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceStartFailed(name, _) if name == "svc"));
    }

    struct SlowDetector(Duration);

    impl FrameworkDetector for SlowDetector {
        fn detect(&self, _repo: &Path) -> Option<FrameworkInfo> {
            std::thread::sleep(self.0);
            None
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn late_start_after_timeout_is_stopped() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ProcessRegistry::new());
        let options = OrchestratorOptions {
            start_timeout: Some(Duration::from_millis(50)),
            stop_grace: Duration::from_secs(1),
            ..OrchestratorOptions::default()
        };
        let starter = LocalServiceStarter::new(options, Arc::clone(&registry))
            .with_detector(Arc::new(SlowDetector(Duration::from_millis(300))));
        let target = RepoTarget::new("slow", dir.path(), ExecutionMode::Local)
            .with_startup("echo $$ > pid; exec sleep 30");

        let outcome = starter.start_all(vec![target]).await;

        assert!(outcome.processes.is_empty());
        assert_eq!(outcome.failed_names(), vec!["slow"]);
        assert!(outcome.failed_services[0].message.contains("timed out"));
        assert!(registry.is_empty());

        // The spawn still happens once detection returns; it must not survive.
        let pid_file = dir.path().join("pid");
        let mut pid = None;
        let mut alive = true;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if pid.is_none() {
                pid = std::fs::read_to_string(&pid_file)
                    .ok()
                    .and_then(|s| s.trim().parse::<i32>().ok());
            }
            if let Some(pid) = pid {
                alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok();
                if !alive {
                    break;
                }
            }
        }
        assert!(pid.is_some(), "late process never spawned");
        assert!(!alive, "late process was left running");
        assert!(registry.is_empty());
    }
}
