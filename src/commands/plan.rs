use stackup::{Orchestrator, Reporter};

pub fn run_plan(orchestrator: &Orchestrator, out: &dyn Reporter) -> anyhow::Result<()> {
    let plan = orchestrator.plan()?;

    if !plan.local.is_empty() {
        out.status("Local services:");
        for (target, start) in &plan.local {
            let framework = start
                .framework
                .as_ref()
                .map(|f| format!(" [{}]", f.describe()))
                .unwrap_or_default();
            out.status(&format!(
                "  {:<16} {} ({:?}){}",
                target.name, start.command, start.source, framework
            ));
        }
    }

    for name in &plan.missing_dockerfiles {
        out.warning(&format!(
            "  {} is in container mode but has no Dockerfile or Dockerfile.dev",
            name
        ));
    }

    match &plan.manifest {
        Some(manifest) => {
            let path = &orchestrator.options().manifest_path;
            manifest.write(path)?;
            out.success(&format!(
                "Wrote {} ({} services)",
                path.display(),
                manifest.services.len()
            ));
            out.status(&manifest.to_yaml()?);
        }
        None => out.status("No container services or infra configured; no manifest written"),
    }
    Ok(())
}
