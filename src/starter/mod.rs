//! Local service startup.
//!
//! Each ready repository gets a startup command (explicit, container
//! sentinel, framework default or generic fallback). Frontend-class services
//! open in a detached terminal through a [`TerminalLauncher`]; everything else
//! runs as a supervised child with stdin closed and stdout/stderr merged into
//! one [`OutputStream`](crate::service::OutputStream).

mod command;
mod local;
mod terminal;

pub use command::{
    package_script, resolve_start_command, validate_package_script, PackageScript, StartCommand,
    StartSource, CONTAINER_START_COMMAND,
};
pub use local::{LocalServiceStarter, StartFailure, StartOutcome};
pub use terminal::{platform_launcher, LinuxTerminal, MacTerminal, TerminalLauncher, WindowsTerminal};
