//! The container stack: manifest synthesis and lifecycle.
//!
//! - [`infra`]: canonical specs for shared infrastructure services
//! - [`manifest`]: compose manifest types and [`ComposeBuilder`]
//! - [`cli`]: the [`ComposeCli`] seam and its `docker compose` implementation
//! - [`parse`]: build/up output scanners
//! - [`runner`]: [`ContainerStackRunner`], build → start → wait healthy

pub mod cli;
pub mod infra;
pub mod manifest;
pub mod parse;
pub mod runner;

pub use cli::{CommandOutcome, ComposeCli, ComposeCommand, DockerComposeCli};
pub use infra::{InfraKind, InfraSpec};
pub use manifest::{
    BuildSpec, ComposeBuilder, ComposeManifest, ComposeService, ContainerServiceSpec,
    DependencyCondition, DependsOn, HealthCheck,
};
pub use runner::{
    evaluate, ContainerStackRunner, HealthDecision, HealthOptions, HealthRecord, HealthStatus,
    StackOutcome, StackState,
};
