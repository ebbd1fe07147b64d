//! Top-level coordination of the local and container lanes.

mod builder;
mod core;

pub use builder::OrchestratorBuilder;
pub use core::*;
