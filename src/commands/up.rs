use super::print_stop_report;
use stackup::service::ProcessRegistry;
use stackup::{HealthStatus, Orchestrator, Reporter, RunSummary};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Lines of captured container output shown when a container phase fails.
const FAILURE_OUTPUT_LINES: usize = 30;

pub async fn run_up(orchestrator: &Orchestrator, follow: bool, out: &dyn Reporter) -> anyhow::Result<bool> {
    let cancel = orchestrator.cancel_token();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let summary = orchestrator.up().await;
    print_summary(&summary, out);

    let interrupted = cancel.is_cancelled();
    if interrupted {
        out.warning("Interrupted");
    }

    let ok = !summary.is_fatal();
    if !interrupted {
        if follow && ok {
            follow_output(&orchestrator.registry(), &cancel, out).await;
        } else if !follow && !summary.has_failures() {
            interrupt.abort();
            out.success("All services started. Run `stackup down` to stop the container stack.");
            return Ok(true);
        }
    }

    interrupt.abort();
    let report = orchestrator.shutdown().await;
    let stopped_cleanly = print_stop_report(&report, out);
    Ok(ok && stopped_cleanly)
}

fn print_summary(summary: &RunSummary, out: &dyn Reporter) {
    let install = &summary.install;
    if !install.ready_services.is_empty() || !install.install_failures.is_empty() {
        out.status(&format!(
            "Install: {} ready, {} failed",
            install.ready_services.len(),
            install.install_failures.len()
        ));
    }

    let start = &summary.start;
    if !start.processes.is_empty() {
        out.success(&format!("Started: {}", start.process_names().join(", ")));
    }
    if !start.failed_services.is_empty() {
        out.error(&format!("Failed to start: {}", start.failed_names().join(", ")));
    }

    let Some(stack) = &summary.stack else {
        return;
    };
    for record in &stack.health {
        let line = format!("  {:<16} {:?} after {}ms ({})", record.service, record.status, record.duration_ms, record.message);
        match record.status {
            HealthStatus::Healthy => out.success(&line),
            _ => out.error(&line),
        }
    }
    if let Some(err) = &stack.error {
        out.error(&err.with_suggestions());
        if let Some(output) = err.captured_output() {
            let lines: Vec<&str> = output.lines().collect();
            let skip = lines.len().saturating_sub(FAILURE_OUTPUT_LINES);
            out.status("Last output:");
            for line in &lines[skip..] {
                out.status(&format!("  {}", line));
            }
        }
    } else if !stack.services.is_empty() {
        out.success(&format!("Container stack healthy: {}", stack.services.join(", ")));
    }
}

/// Print every service's output until `cancel` fires.
async fn follow_output(registry: &Arc<ProcessRegistry>, cancel: &CancellationToken, out: &dyn Reporter) {
    let processes = registry.snapshot();
    if processes.is_empty() {
        out.status("Nothing running to follow.");
        return;
    }
    out.status("Following output (Ctrl-C to stop everything)...");

    let forwarders: Vec<_> = processes
        .into_values()
        .map(|process| {
            let mut rx = process.output().subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(line) => println!("{}", line),
                        Err(RecvError::Lagged(missed)) => {
                            println!("[{}] ... {} line(s) skipped", process.name(), missed);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            })
        })
        .collect();

    cancel.cancelled().await;
    for forwarder in forwarders {
        forwarder.abort();
    }
}
