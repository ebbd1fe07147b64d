// thiserror's generated code for struct variants trips this lint even though
// every field is used by the Display impl.
#![allow(unused_assignments)]

use crate::classify::{ContainerErrorKind, InstallErrorKind};
use crate::docker::DockerError;
use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(stackup::config::error),
        help("Check the repository entries in stackup.yaml")
    )]
    Config(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(code(stackup::config::validation))]
    Validation(String),

    #[error("Script '{script}' is not defined in {repo}/package.json")]
    #[diagnostic(
        code(stackup::start::script_not_found),
        help("Add the script to package.json or set an explicit `start` command for '{repo}'")
    )]
    ScriptNotFound { repo: String, script: String },

    #[error("Command not found: {0}")]
    #[diagnostic(
        code(stackup::process::not_found),
        help("Install the tool or make sure it is on your PATH")
    )]
    CommandNotFound(String),

    #[error("Install failed for '{repo}' ({kind}): {message}")]
    #[diagnostic(code(stackup::install::failed))]
    Install {
        repo: String,
        kind: InstallErrorKind,
        message: String,
    },

    #[error("Service '{0}' failed to start: {1}")]
    #[diagnostic(
        code(stackup::service::start_failed),
        help("Verify the start command exists and is executable")
    )]
    ServiceStartFailed(String, String),

    #[error("Process error: {0}")]
    #[diagnostic(code(stackup::process::error))]
    Process(String),

    #[error("Container build failed ({kind})")]
    #[diagnostic(code(stackup::container::build))]
    ContainerBuild {
        kind: ContainerErrorKind,
        output: String,
    },

    #[error("Container stack failed to start ({kind})")]
    #[diagnostic(code(stackup::container::start))]
    ContainerStart {
        kind: ContainerErrorKind,
        output: String,
    },

    #[error("Service '{service}' reported unhealthy: {message}")]
    #[diagnostic(
        code(stackup::health::unhealthy),
        help("Inspect the container logs with `docker compose logs {service}`")
    )]
    Unhealthy { service: String, message: String },

    #[error("Service '{service}' container is {status}")]
    #[diagnostic(
        code(stackup::health::exited),
        help("Inspect the container logs with `docker compose logs {service}`")
    )]
    ServiceExited { service: String, status: String },

    #[error("Timed out after {waited:?} waiting for services to become healthy: {}", .pending.join(", "))]
    #[diagnostic(
        code(stackup::health::timeout),
        help("Increase options.health_timeout or check the pending services' logs")
    )]
    HealthTimeout { pending: Vec<String>, waited: Duration },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Operation aborted")]
    Aborted,

    #[error("Docker error: {0}")]
    #[diagnostic(
        code(stackup::docker::error),
        help("Check that Docker is running with `docker ps`")
    )]
    Docker(#[from] DockerError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Deterministic remediation hints for this error, most relevant first.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Error::Install { kind, .. } => to_owned(kind.suggestions()),
            Error::ContainerBuild { kind, .. } | Error::ContainerStart { kind, .. } => {
                to_owned(kind.suggestions())
            }
            Error::CommandNotFound(_) => to_owned(InstallErrorKind::CommandNotFound.suggestions()),
            Error::ScriptNotFound { repo, script } => vec![
                format!("Define \"{}\" under \"scripts\" in {}/package.json", script, repo),
                format!("Or set `start:` for '{}' in stackup.yaml", repo),
            ],
            Error::Unhealthy { service, .. } | Error::ServiceExited { service, .. } => vec![
                format!("docker compose logs {}", service),
                "Check the service's healthcheck command and required environment".to_string(),
            ],
            Error::HealthTimeout { pending, .. } => vec![
                format!("docker compose logs {}", pending.join(" ")),
                "Raise options.health_timeout if the services are just slow to boot".to_string(),
            ],
            Error::Docker(_) => vec!["Check that Docker is running: docker ps".to_string()],
            Error::Config(_) | Error::Validation(_) => {
                vec!["Review stackup.yaml".to_string()]
            }
            _ => Vec::new(),
        }
    }

    /// The captured diagnostic output of a fatal container phase, if any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Error::ContainerBuild { output, .. } | Error::ContainerStart { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }

    /// Formats the error with its suggestions for user-facing display.
    pub fn with_suggestions(&self) -> String {
        let suggestions = self.suggestions();
        if suggestions.is_empty() {
            return self.to_string();
        }
        let hints: Vec<String> = suggestions.iter().map(|s| format!("  - {}", s)).collect();
        format!("{}\n\nHint:\n{}", self, hints.join("\n"))
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_error_uses_category_suggestions() {
        let err = Error::Install {
            repo: "api".into(),
            kind: InstallErrorKind::Network,
            message: "ETIMEDOUT".into(),
        };
        assert_eq!(
            err.suggestions(),
            to_owned(InstallErrorKind::Network.suggestions())
        );
    }

    #[test]
    fn health_timeout_names_pending_services() {
        let err = Error::HealthTimeout {
            pending: vec!["cache".into(), "api".into()],
            waited: Duration::from_secs(300),
        };
        let msg = err.to_string();
        assert!(msg.contains("cache, api"), "got: {}", msg);
    }

    #[test]
    fn with_suggestions_appends_hints() {
        let err = Error::ScriptNotFound {
            repo: "web".into(),
            script: "dev".into(),
        };
        let text = err.with_suggestions();
        assert!(text.starts_with("Script 'dev' is not defined"));
        assert!(text.contains("Hint:"));
    }

    #[test]
    fn plain_errors_have_no_suggestions() {
        assert!(Error::Aborted.suggestions().is_empty());
        assert_eq!(Error::Aborted.with_suggestions(), "Operation aborted");
    }
}
