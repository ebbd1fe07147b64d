//! Workspace configuration types.
//!
//! [`WorkspaceConfig`] is the on-disk shape of `stackup.yaml`. It is resolved
//! once into immutable [`RepoTarget`]s and an [`OrchestratorOptions`] value
//! that is handed to every orchestration component.

use super::duration::optional_duration;
use crate::compose::InfraKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default file name of the generated compose manifest.
pub const DEFAULT_MANIFEST_FILE: &str = "docker-compose.stackup.yml";
/// Default compose project and network name.
pub const DEFAULT_PROJECT: &str = "stackup";
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Where a repository runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Local,
    Container,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Container => write!(f, "container"),
        }
    }
}

/// Whether a target's settings came from its own entry or the global defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Repo,
    Global,
}

/// A repository resolved for one orchestration run. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoTarget {
    pub name: String,
    pub path: PathBuf,
    pub mode: ExecutionMode,
    pub install_command: Option<String>,
    pub startup_command: Option<String>,
    pub source: ConfigSource,
    /// Resolved `.env` content for the repository.
    pub env: HashMap<String, String>,
    pub ports: Vec<u16>,
    /// Other application services this one is start-ordered after (container mode).
    pub depends_on: Vec<String>,
    /// Force the detached-terminal launch path regardless of detected framework.
    pub terminal: bool,
}

impl RepoTarget {
    /// Minimal target, mostly useful in tests and programmatic setups.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, mode: ExecutionMode) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            mode,
            install_command: None,
            startup_command: None,
            source: ConfigSource::Global,
            env: HashMap::new(),
            ports: Vec::new(),
            depends_on: Vec::new(),
            terminal: false,
        }
    }

    pub fn with_install(mut self, command: impl Into<String>) -> Self {
        self.install_command = Some(command.into());
        self.source = ConfigSource::Repo;
        self
    }

    pub fn with_startup(mut self, command: impl Into<String>) -> Self {
        self.startup_command = Some(command.into());
        self.source = ConfigSource::Repo;
        self
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }
}

/// Global defaults applied to repositories that don't override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoDefaults {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
}

/// A single `repos:` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Repository directory, relative to the config file. Defaults to the repo name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub terminal: bool,
}

/// The `options:` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub skip_install: bool,
    #[serde(default, with = "optional_duration", skip_serializing_if = "Option::is_none")]
    pub install_timeout: Option<Duration>,
    #[serde(default, with = "optional_duration", skip_serializing_if = "Option::is_none")]
    pub start_timeout: Option<Duration>,
    #[serde(default, with = "optional_duration", skip_serializing_if = "Option::is_none")]
    pub health_interval: Option<Duration>,
    #[serde(default, with = "optional_duration", skip_serializing_if = "Option::is_none")]
    pub health_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            skip_install: false,
            install_timeout: None,
            start_timeout: None,
            health_interval: None,
            health_timeout: None,
            manifest: None,
            project: None,
            network: None,
        }
    }
}

/// Root structure of `stackup.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub defaults: RepoDefaults,
    #[serde(default)]
    pub options: OptionsConfig,
    /// Infra services required by the workspace.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub infra: BTreeSet<InfraKind>,
    /// Overrides for the canonical infra environment defaults.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub infra_env: BTreeMap<InfraKind, BTreeMap<String, String>>,
    #[serde(default)]
    pub repos: BTreeMap<String, RepoConfig>,
}

impl WorkspaceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.options.concurrency == 0 {
            return Err(Error::Validation(
                "options.concurrency must be at least 1".to_string(),
            ));
        }
        if self.options.health_interval == Some(Duration::ZERO) {
            return Err(Error::Validation(
                "options.health_interval must be greater than zero".to_string(),
            ));
        }
        for (name, repo) in &self.repos {
            if name.trim().is_empty() {
                return Err(Error::Validation("repository names cannot be empty".to_string()));
            }
            for dep in &repo.depends_on {
                if !self.repos.contains_key(dep) {
                    return Err(Error::Validation(format!(
                        "repository '{}' depends on unknown repository '{}'",
                        name, dep
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve every repository entry into a [`RepoTarget`].
    ///
    /// Relative paths are resolved against `base_dir` (the config file's directory).
    pub fn targets(&self, base_dir: &Path) -> Vec<RepoTarget> {
        self.repos
            .iter()
            .map(|(name, repo)| {
                let path = repo.path.clone().unwrap_or_else(|| PathBuf::from(name));
                let path = if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                };
                let overrides =
                    repo.mode.is_some() || repo.install.is_some() || repo.start.is_some();
                RepoTarget {
                    name: name.clone(),
                    path,
                    mode: repo.mode.unwrap_or(self.defaults.mode),
                    install_command: repo.install.clone().or_else(|| self.defaults.install.clone()),
                    startup_command: repo.start.clone().or_else(|| self.defaults.start.clone()),
                    source: if overrides {
                        ConfigSource::Repo
                    } else {
                        ConfigSource::Global
                    },
                    env: repo.env.clone(),
                    ports: repo.ports.clone(),
                    depends_on: repo.depends_on.clone(),
                    terminal: repo.terminal,
                }
            })
            .collect()
    }

    /// Build the options value object, resolving the manifest path against `work_dir`.
    pub fn orchestrator_options(&self, work_dir: &Path) -> OrchestratorOptions {
        let opts = &self.options;
        let manifest = opts
            .manifest
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_FILE));
        OrchestratorOptions {
            concurrency: opts.concurrency.max(1),
            skip_install: opts.skip_install,
            install_timeout: opts.install_timeout,
            start_timeout: opts.start_timeout,
            health_interval: opts.health_interval.unwrap_or(DEFAULT_HEALTH_INTERVAL),
            health_timeout: opts.health_timeout.unwrap_or(DEFAULT_HEALTH_TIMEOUT),
            manifest_path: if manifest.is_absolute() {
                manifest
            } else {
                work_dir.join(manifest)
            },
            project: opts.project.clone().unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
            network: opts.network.clone().unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
            ..OrchestratorOptions::default()
        }
    }
}

/// Exponential backoff policy for retryable install failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

/// Configuration value object injected into every orchestration component.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub concurrency: usize,
    pub skip_install: bool,
    pub install_timeout: Option<Duration>,
    pub start_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub health_interval: Duration,
    pub health_timeout: Duration,
    pub manifest_path: PathBuf,
    pub project: String,
    pub network: String,
    /// Grace period between SIGTERM and SIGKILL when stopping local processes.
    pub stop_grace: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            skip_install: false,
            install_timeout: None,
            start_timeout: None,
            retry: RetryPolicy::default(),
            health_interval: DEFAULT_HEALTH_INTERVAL,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            manifest_path: PathBuf::from(DEFAULT_MANIFEST_FILE),
            project: DEFAULT_PROJECT.to_string(),
            network: DEFAULT_PROJECT.to_string(),
            stop_grace: Duration::from_secs(5),
        }
    }
}
