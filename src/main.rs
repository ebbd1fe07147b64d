mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use stackup::{CliReporter, Error as StackError, Orchestrator, Parser as ConfigParser, Reporter};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            if let Some(stack_error) = e.downcast_ref::<StackError>() {
                eprintln!("Error: {}", stack_error.with_suggestions());
            } else {
                eprintln!("Error: {:#}", e);
            }
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let work_dir = match &cli.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => ConfigParser::find_config_in_dir(&work_dir)?,
    };
    let config = ConfigParser::new().load_config(&config_path)?;
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| work_dir.clone());
    tracing::debug!("Loaded {}", config_path.display());

    let reporter: Arc<dyn Reporter> = Arc::new(CliReporter);
    let mut builder = Orchestrator::builder()
        .config(config)
        .work_dir(&work_dir)
        .config_dir(config_dir)
        .reporter(Arc::clone(&reporter));

    match cli.command {
        Commands::Up {
            skip_install,
            concurrency,
            no_follow,
        } => {
            if skip_install {
                builder = builder.skip_install(true);
            }
            if let Some(concurrency) = concurrency {
                builder = builder.concurrency(concurrency);
            }
            let orchestrator = builder.build()?;
            commands::run_up(&orchestrator, !no_follow, reporter.as_ref()).await
        }
        Commands::Down => {
            let orchestrator = builder.build()?;
            commands::run_down(&orchestrator, reporter.as_ref()).await
        }
        Commands::Plan => {
            let orchestrator = builder.build()?;
            commands::run_plan(&orchestrator, reporter.as_ref())?;
            Ok(true)
        }
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
