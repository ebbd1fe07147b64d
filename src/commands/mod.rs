mod down;
mod plan;
mod up;

pub use down::run_down;
pub use plan::run_plan;
pub use up::run_up;

use stackup::{Reporter, StopReport};

/// Print a stop report; returns its success flag.
pub(crate) fn print_stop_report(report: &StopReport, out: &dyn Reporter) -> bool {
    for record in report.process_errors.iter().chain(&report.docker.errors) {
        out.error(&format!(
            "  {} ({:?}): {}",
            record.service,
            record.kind,
            record.message.as_deref().unwrap_or("failed")
        ));
    }
    if report.success {
        out.success(&format!("Shutdown complete: {}", report));
    } else {
        out.warning(&format!("Shutdown finished with errors: {}", report));
    }
    report.success
}
