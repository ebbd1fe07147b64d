//! Dependency installation.
//!
//! [`DependencyInstaller`] decides per repository whether an install is
//! needed, runs it through a [`CommandExecutor`] with retry and backoff on
//! transient failures, and partitions the targets into ready and failed.

mod executor;
mod installer;

pub use executor::{CommandExecutor, CommandOutput, ShellExecutor};
pub use installer::{
    CommandSource, DependencyInstaller, InstallDecision, InstallFailure, InstallOutcome, SkipReason,
};
