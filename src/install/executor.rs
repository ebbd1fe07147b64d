use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

/// Exit status and merged output of one command run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs shell command lines to completion. The installer's only side effect.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` in `cwd`. `Err` means the command could not be spawned.
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
    ) -> std::io::Result<CommandOutput>;
}

/// Runs commands through `sh -c` with stdout and stderr merged.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

/// Words the shell handles itself; they have no binary to look up.
const SHELL_WORDS: &[&str] = &[
    "cd", "export", "source", ".", "set", "exec", "eval", "if", "for", "while", "case", "{", "(",
];

/// First word of a command line, unless it is a path, an env assignment or
/// a shell builtin.
pub(crate) fn program_name(command: &str) -> Option<&str> {
    let first = command.split_whitespace().next()?;
    if first.contains('/') || first.contains('=') || SHELL_WORDS.contains(&first) {
        return None;
    }
    Some(first.trim_end_matches(';'))
}

/// Whether `program` resolves on PATH.
///
/// The lookup stats every PATH entry, so it runs on the blocking pool. If the
/// lookup task itself fails, the shell is left to report a missing program.
pub(crate) async fn on_path(program: &str) -> bool {
    let program = program.to_string();
    tokio::task::spawn_blocking(move || which::which(program).is_ok())
        .await
        .unwrap_or(true)
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(
        &self,
        command: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
    ) -> std::io::Result<CommandOutput> {
        if let Some(program) = program_name(command) {
            if !on_path(program).await {
                tracing::debug!("'{}' not found on PATH", program);
                return Ok(CommandOutput {
                    exit_code: Some(127),
                    output: format!("{}: command not found", program),
                });
            }
        }

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(format!("exec 2>&1\n{}", command))
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_name_skips_paths_and_assignments() {
        assert_eq!(program_name("npm ci"), Some("npm"));
        assert_eq!(program_name("./install.sh"), None);
        assert_eq!(program_name("CI=1 npm ci"), None);
        assert_eq!(program_name("cd web && npm ci"), None);
        assert_eq!(program_name("   "), None);
    }

    #[tokio::test]
    async fn shell_merges_stderr_into_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = ShellExecutor
            .run("echo out; echo err >&2; exit 3", dir.path(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.output, "out\nerr\n");
    }

    #[tokio::test]
    async fn on_path_finds_shell_and_rejects_unknown() {
        assert!(on_path("sh").await);
        assert!(!on_path("definitely-not-a-real-binary-xyz").await);
    }

    #[tokio::test]
    async fn missing_program_reports_127() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = ShellExecutor
            .run("definitely-not-a-real-binary-xyz install", dir.path(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(127));
        assert!(out.output.contains("command not found"));
    }
}
