//! Managed processes: the uniform handle for every running service.
//!
//! - [`OutputStream`]: named, line-oriented output with a bounded tail
//! - [`ProcessHandle`] / [`ManagedProcess`]: process lifecycle and stop
//! - [`ProcessRegistry`]: the shared name → process map

mod output;
mod process;
mod registry;

pub use output::*;
pub use process::*;
pub use registry::*;
