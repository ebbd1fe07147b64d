#![allow(unused_assignments)]

//! # stackup
//!
//! Brings up a multi-repository development environment and tears it down
//! again.
//!
//! ## Features
//!
//! - **Bounded concurrency**: installs and starts run at most N at a time with
//!   per-item timeouts and cooperative cancellation ([`runner`])
//! - **Dependency installation**: per-repository install with error
//!   classification and exponential backoff on transient failures ([`install`])
//! - **Local services**: supervised child processes with merged output, or a
//!   detached terminal for frontend dev servers ([`starter`])
//! - **Container stack**: one synthesized compose manifest for infra and
//!   containerized repositories, health-gated startup ([`compose`])
//! - **Coordinated shutdown**: process groups first, then `compose down`, with
//!   a consolidated report ([`shutdown`])
//!
//! ## Quick Start
//!
//! ```no_run
//! use stackup::{Orchestrator, Parser};
//!
//! # async fn example() -> Result<(), stackup::Error> {
//! let config = Parser::new().load_config("stackup.yaml")?;
//! let orchestrator = Orchestrator::builder().config(config).build()?;
//!
//! let summary = orchestrator.up().await;
//! for failure in &summary.install.install_failures {
//!     eprintln!("{}: {}", failure.name, failure.message);
//! }
//!
//! let report = orchestrator.shutdown().await;
//! assert!(report.success);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! Concurrency means overlapping external-process lifecycles, not parallel
//! computation:
//! - [`runner::run_bounded`] is the only place that bounds in-flight work
//! - The [`ProcessRegistry`] is the one shared mutable collection; each phase
//!   publishes its processes in a single mutation
//! - Shutdown runs exactly once even with concurrent calls

pub mod classify;
pub mod compose;
pub mod config;
pub mod docker;
pub mod error;
pub mod framework;
pub mod install;
pub mod orchestrator;
pub mod reporter;
pub mod runner;
pub mod service;
pub mod shutdown;
pub mod starter;

// Re-export commonly used types
pub use classify::{ContainerErrorKind, InstallErrorKind};
pub use compose::{ComposeCli, ComposeManifest, HealthRecord, HealthStatus, InfraKind, StackState};
pub use config::{ExecutionMode, OrchestratorOptions, Parser, RepoTarget, WorkspaceConfig};
pub use error::{Error, Result};
pub use install::{DependencyInstaller, InstallOutcome};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, Plan, RunSummary, StackReport};
pub use reporter::{CliReporter, QuietReporter, Reporter};
pub use service::{ManagedProcess, OutputStream, ProcessRegistry};
pub use shutdown::{ShutdownCoordinator, StopReport};
pub use starter::{LocalServiceStarter, StartOutcome};
