use super::print_stop_report;
use stackup::{Orchestrator, Reporter};

pub async fn run_down(orchestrator: &Orchestrator, out: &dyn Reporter) -> anyhow::Result<bool> {
    out.status(&format!(
        "Tearing down stack from {}",
        orchestrator.options().manifest_path.display()
    ));
    let report = orchestrator.down().await;
    Ok(print_stop_report(&report, out))
}
