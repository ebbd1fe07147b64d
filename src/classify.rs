//! Failure categories for install commands and container phases.
//!
//! Classification is substring matching on the lower-cased captured output.
//! Order matters: the first matching category wins, so more specific phrases
//! are checked before broad ones (e.g. `ETIMEDOUT` against the registry host
//! is a network problem, not a registry problem).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an install command failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallErrorKind {
    Permission,
    CommandNotFound,
    Network,
    Registry,
    Syntax,
    Version,
    Timeout,
    Unknown,
}

const PERMISSION_PATTERNS: &[&str] = &[
    "eacces",
    "eperm",
    "permission denied",
    "operation not permitted",
    "access is denied",
];

const NOT_FOUND_PATTERNS: &[&str] = &[
    "command not found",
    "is not recognized as an internal or external command",
    "no such file or directory (os error 2)",
    "spawn enoent",
    "executable file not found",
];

const SYNTAX_PATTERNS: &[&str] = &[
    "syntaxerror",
    "unexpected token",
    "ejsonparse",
    "parse error",
    "failed to parse",
    "invalid json",
];

const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout exceeded", "esockettimedout"];

const NETWORK_PATTERNS: &[&str] = &[
    "etimedout",
    "econnreset",
    "econnrefused",
    "enotfound",
    "eai_again",
    "getaddrinfo",
    "socket hang up",
    "network",
    "unable to connect",
    "could not resolve host",
];

const REGISTRY_PATTERNS: &[&str] = &[
    "e404",
    "404 not found",
    "e401",
    "e403",
    "eintegrity",
    "registry",
    "unauthorized",
    "package not found",
];

const VERSION_PATTERNS: &[&str] = &[
    "ebadengine",
    "unsupported engine",
    "notarget",
    "no matching version",
    "incompatible",
    "requires node",
    "version mismatch",
    "eresolve",
];

fn contains_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

impl InstallErrorKind {
    /// Classify captured install output.
    pub fn classify(output: &str) -> Self {
        let text = output.to_lowercase();
        if contains_any(&text, PERMISSION_PATTERNS) {
            InstallErrorKind::Permission
        } else if contains_any(&text, NOT_FOUND_PATTERNS) {
            InstallErrorKind::CommandNotFound
        } else if contains_any(&text, SYNTAX_PATTERNS) {
            InstallErrorKind::Syntax
        } else if contains_any(&text, TIMEOUT_PATTERNS) {
            InstallErrorKind::Timeout
        } else if contains_any(&text, NETWORK_PATTERNS) {
            InstallErrorKind::Network
        } else if contains_any(&text, REGISTRY_PATTERNS) {
            InstallErrorKind::Registry
        } else if contains_any(&text, VERSION_PATTERNS) {
            InstallErrorKind::Version
        } else {
            InstallErrorKind::Unknown
        }
    }

    /// Classify a non-zero exit, honouring the shell's 127 convention.
    pub fn classify_exit(exit_code: Option<i32>, output: &str) -> Self {
        match exit_code {
            Some(127) => InstallErrorKind::CommandNotFound,
            Some(126) => InstallErrorKind::Permission,
            _ => Self::classify(output),
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InstallErrorKind::Network | InstallErrorKind::Timeout | InstallErrorKind::Registry
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallErrorKind::Permission => "permission",
            InstallErrorKind::CommandNotFound => "command-not-found",
            InstallErrorKind::Network => "network",
            InstallErrorKind::Registry => "registry",
            InstallErrorKind::Syntax => "syntax",
            InstallErrorKind::Version => "version",
            InstallErrorKind::Timeout => "timeout",
            InstallErrorKind::Unknown => "unknown",
        }
    }

    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            InstallErrorKind::Permission => &[
                "Check ownership of the repository and its dependency directories",
                "Avoid running the package manager with sudo; fix the cache directory permissions instead",
            ],
            InstallErrorKind::CommandNotFound => &[
                "Install the package manager used by this repository",
                "Make sure it is on the PATH of the shell running stackup",
            ],
            InstallErrorKind::Network => &[
                "Check your internet connection and any proxy/VPN settings",
                "Retry once the network is stable",
            ],
            InstallErrorKind::Registry => &[
                "Verify the package registry URL and your credentials (.npmrc, pip.conf, ...)",
                "Check that the requested package and version exist",
            ],
            InstallErrorKind::Syntax => &[
                "Fix the syntax error in the manifest file (package.json, Cargo.toml, ...)",
                "Validate the file with a linter before retrying",
            ],
            InstallErrorKind::Version => &[
                "Switch to the runtime version the repository requires (.nvmrc, rust-toolchain, ...)",
                "Relax or update the conflicting dependency constraints",
            ],
            InstallErrorKind::Timeout => &[
                "The install took too long; retry or raise options.install_timeout",
                "Check for a slow or unreachable package mirror",
            ],
            InstallErrorKind::Unknown => &[
                "Run the install command manually in the repository to see the full output",
            ],
        }
    }
}

impl fmt::Display for InstallErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a container build or start failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerErrorKind {
    PortConflict,
    Permission,
    FileNotFound,
    Network,
    Build,
    Image,
    Volume,
    Resource,
    Syntax,
    Unknown,
}

impl ContainerErrorKind {
    pub fn classify(output: &str) -> Self {
        let text = output.to_lowercase();
        if contains_any(
            &text,
            &["port is already allocated", "address already in use", "bind for"],
        ) {
            ContainerErrorKind::PortConflict
        } else if contains_any(
            &text,
            &[
                "pull access denied",
                "manifest unknown",
                "repository does not exist",
                "image not found",
                "no such image",
            ],
        ) {
            ContainerErrorKind::Image
        } else if contains_any(&text, &["permission denied", "access denied", "eacces"]) {
            ContainerErrorKind::Permission
        } else if contains_any(
            &text,
            &["no space left on device", "out of memory", "cannot allocate memory", "oomkilled"],
        ) {
            ContainerErrorKind::Resource
        } else if contains_any(
            &text,
            &["yaml:", "invalid compose", "additional property", "is invalid", "unexpected character"],
        ) {
            ContainerErrorKind::Syntax
        } else if contains_any(
            &text,
            &[
                "no such file or directory",
                "failed to read dockerfile",
                "cannot locate specified dockerfile",
                "not found: not found",
            ],
        ) {
            ContainerErrorKind::FileNotFound
        } else if contains_any(&text, &["volume", "mount"]) {
            ContainerErrorKind::Volume
        } else if contains_any(
            &text,
            &["network", "dial tcp", "tls handshake", "i/o timeout", "connection refused"],
        ) {
            ContainerErrorKind::Network
        } else if contains_any(
            &text,
            &[
                "failed to solve",
                "executor failed",
                "returned a non-zero code",
                "did not complete successfully",
                "error building",
            ],
        ) {
            ContainerErrorKind::Build
        } else {
            ContainerErrorKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerErrorKind::PortConflict => "port-conflict",
            ContainerErrorKind::Permission => "permission",
            ContainerErrorKind::FileNotFound => "file-not-found",
            ContainerErrorKind::Network => "network",
            ContainerErrorKind::Build => "build",
            ContainerErrorKind::Image => "image",
            ContainerErrorKind::Volume => "volume",
            ContainerErrorKind::Resource => "resource",
            ContainerErrorKind::Syntax => "syntax",
            ContainerErrorKind::Unknown => "unknown",
        }
    }

    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            ContainerErrorKind::PortConflict => &[
                "Find what holds the port: lsof -i :<port>",
                "Stop the conflicting process/container or change the port mapping",
            ],
            ContainerErrorKind::Permission => &[
                "Make sure your user can talk to the Docker daemon (docker group / Docker Desktop running)",
                "Check file permissions of the build context",
            ],
            ContainerErrorKind::FileNotFound => &[
                "Check that the Dockerfile and every COPY source exist in the build context",
                "Review .dockerignore for over-broad patterns",
            ],
            ContainerErrorKind::Network => &[
                "Check your internet connection and Docker's DNS/proxy settings",
                "Retry; registries and package mirrors fail transiently",
            ],
            ContainerErrorKind::Build => &[
                "Read the failing build step above and reproduce it with docker build",
                "Try a clean build: docker compose build --no-cache",
            ],
            ContainerErrorKind::Image => &[
                "Check the image name and tag",
                "Log in to the registry if the image is private: docker login",
            ],
            ContainerErrorKind::Volume => &[
                "Check that mounted host paths exist",
                "Remove stale volumes: docker volume prune",
            ],
            ContainerErrorKind::Resource => &[
                "Free disk space: docker system prune",
                "Give Docker more memory/CPU in its settings",
            ],
            ContainerErrorKind::Syntax => &[
                "Validate the generated manifest: docker compose config",
                "Check repository Dockerfiles for syntax errors",
            ],
            ContainerErrorKind::Unknown => &[
                "Re-run with RUST_LOG=debug for the full Docker output",
            ],
        }
    }
}

impl fmt::Display for ContainerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
