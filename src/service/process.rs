use super::OutputStream;
use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, killpg, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::watch;

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);

/// What a [`ManagedProcess`] is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    /// A child process whose merged output we capture.
    Supervised,
    /// A launcher that opened a detached terminal window; output is not captured.
    Terminal,
    /// A `compose logs -f` attachment to a container-backed service.
    ContainerLogs,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessKind::Supervised => "process",
            ProcessKind::Terminal => "terminal",
            ProcessKind::ContainerLogs => "container-logs",
        })
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// Set when waiting on the child failed.
    pub error: Option<String>,
}

impl ExitInfo {
    fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
            error: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal, &self.error) {
            (_, _, Some(err)) => write!(f, "error: {}", err),
            (Some(code), _, _) => write!(f, "exit code {}", code),
            (None, Some(sig), _) => match Signal::try_from(sig) {
                Ok(sig) => write!(f, "signal {}", sig),
                Err(_) => write!(f, "signal {}", sig),
            },
            (None, None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Handle to the underlying OS process of a managed service.
///
/// A background task owns the `Child` and publishes its exit through a watch
/// channel, so the handle can be cloned freely and awaited from anywhere.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kind: ProcessKind,
    exit: watch::Receiver<Option<ExitInfo>>,
}

impl ProcessHandle {
    /// Take ownership of `child` and start waiting for it in the background.
    pub fn supervise(mut child: Child, kind: ProcessKind) -> Self {
        let pid = child.id();
        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let info = match child.wait().await {
                Ok(status) => ExitInfo::from_status(status),
                Err(e) => ExitInfo {
                    code: None,
                    signal: None,
                    error: Some(e.to_string()),
                },
            };
            let _ = tx.send(Some(info));
        });
        Self {
            pid,
            kind,
            exit: rx,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    /// Exit information if the process has already ended.
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.exit.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Wait until the process ends.
    pub async fn wait(&self) -> ExitInfo {
        let mut rx = self.exit.clone();
        let info = match rx.wait_for(|info| info.is_some()).await {
            Ok(info) => info.clone(),
            // Sender dropped without a value: the waiter task was cancelled.
            Err(_) => None,
        };
        info.unwrap_or_else(lost_exit)
    }

    /// Stop the process group: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// Returns the exit information, or `Ok(None)` if the process was never
    /// observed to exit (for example a launcher whose terminal outlives it).
    #[tracing::instrument(skip(self), fields(pid = ?self.pid, kind = %self.kind))]
    pub async fn stop(&self, grace: Duration) -> Result<Option<ExitInfo>> {
        if let Some(info) = self.exit_info() {
            return Ok(Some(info));
        }
        let Some(raw_pid) = self.pid else {
            return Ok(None);
        };
        let pid = validate_pid(raw_pid)?;

        match send_signal(pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Ok(self.exit_info()),
            Err(e) => {
                return Err(Error::Process(format!(
                    "failed to send SIGTERM to {}: {}",
                    raw_pid, e
                )))
            }
        }

        if let Ok(info) = tokio::time::timeout(grace, self.wait()).await {
            tracing::debug!("Process {} exited gracefully", raw_pid);
            return Ok(Some(info));
        }

        tracing::warn!(
            "Process {} did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
            raw_pid,
            grace
        );
        match send_signal(pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                return Err(Error::Process(format!(
                    "failed to send SIGKILL to {}: {}",
                    raw_pid, e
                )))
            }
        }
        Ok(tokio::time::timeout(Duration::from_secs(2), self.wait())
            .await
            .ok())
    }
}

fn lost_exit() -> ExitInfo {
    ExitInfo {
        code: None,
        signal: None,
        error: Some("exit status lost".to_string()),
    }
}

/// Signal the process group, falling back to the single process.
fn send_signal(pid: Pid, sig: Signal) -> std::result::Result<(), Errno> {
    killpg(pid, sig).or_else(|_| signal::kill(pid, sig))
}

/// Reject PIDs that would signal ourselves, init, or wrap negative.
fn validate_pid(raw: u32) -> Result<Pid> {
    if raw <= 1 || raw > i32::MAX as u32 {
        return Err(Error::Process(format!("refusing to signal invalid PID {}", raw)));
    }
    Ok(Pid::from_raw(raw as i32))
}

/// A named service with its output stream and process handle.
///
/// Clones share the same stream and handle.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    id: u64,
    name: String,
    output: OutputStream,
    handle: ProcessHandle,
}

impl ManagedProcess {
    pub fn new(name: impl Into<String>, output: OutputStream, handle: ProcessHandle) -> Self {
        Self {
            id: NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            output,
            handle,
        }
    }

    /// Unique per instance, so a restarted service never matches a stale entry.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> &OutputStream {
        &self.output
    }

    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    pub fn kind(&self) -> ProcessKind {
        self.handle.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    fn spawn_sh(script: &str) -> Child {
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap()
    }

    #[test]
    fn validate_pid_rejects_reserved_values() {
        assert!(validate_pid(0).is_err());
        assert!(validate_pid(1).is_err());
        assert!(validate_pid(u32::MAX).is_err());
        assert!(validate_pid(4242).is_ok());
    }

    #[test]
    fn exit_info_display() {
        let code = ExitInfo {
            code: Some(3),
            signal: None,
            error: None,
        };
        assert_eq!(code.to_string(), "exit code 3");
        let sig = ExitInfo {
            code: None,
            signal: Some(15),
            error: None,
        };
        assert_eq!(sig.to_string(), "signal SIGTERM");
    }

    #[tokio::test]
    async fn wait_reports_exit_code() {
        let handle = ProcessHandle::supervise(spawn_sh("exit 7"), ProcessKind::Supervised);
        let info = handle.wait().await;
        assert_eq!(info.code, Some(7));
        assert!(handle.has_exited());
    }

    #[tokio::test]
    async fn stop_terminates_long_running_process() {
        let handle = ProcessHandle::supervise(spawn_sh("sleep 30"), ProcessKind::Supervised);
        let info = handle
            .stop(Duration::from_secs(5))
            .await
            .unwrap()
            .expect("process should exit");
        assert_eq!(info.signal, Some(Signal::SIGTERM as i32));
    }

    #[tokio::test]
    async fn stop_escalates_to_sigkill() {
        let handle = ProcessHandle::supervise(
            spawn_sh("trap '' TERM; while true; do sleep 0.1; done"),
            ProcessKind::Supervised,
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        let info = handle
            .stop(Duration::from_millis(300))
            .await
            .unwrap()
            .expect("process should exit");
        assert_eq!(info.signal, Some(Signal::SIGKILL as i32));
    }

    #[tokio::test]
    async fn stop_after_exit_is_noop() {
        let handle = ProcessHandle::supervise(spawn_sh("true"), ProcessKind::Supervised);
        handle.wait().await;
        let info = handle.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(info.and_then(|i| i.code), Some(0));
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let a = ManagedProcess::new(
            "a",
            OutputStream::new("a"),
            ProcessHandle::supervise(spawn_sh("true"), ProcessKind::Supervised),
        );
        let b = a.clone();
        let c = ManagedProcess::new(
            "a",
            OutputStream::new("a"),
            ProcessHandle::supervise(spawn_sh("true"), ProcessKind::Supervised),
        );
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }
}
