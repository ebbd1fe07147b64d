//! Workspace configuration.
//!
//! - `types` - `stackup.yaml` structure, resolved [`RepoTarget`]s and [`OrchestratorOptions`]
//! - `duration` - `"5s"`-style duration parsing
//! - `parser` - config discovery and loading

mod duration;
mod parser;
mod types;

pub use duration::*;
pub use parser::*;
pub use types::*;
