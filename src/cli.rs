use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stackup")]
#[command(about = "Install, start and tear down a multi-repository development environment")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to stackup.yaml in the working directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Working directory
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install dependencies and start every repository, then follow output until Ctrl-C
    Up {
        /// Skip dependency installation
        #[arg(long)]
        skip_install: bool,

        /// Maximum installs/starts in flight at once
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,

        /// Return once everything is started instead of streaming output
        #[arg(long)]
        no_follow: bool,
    },
    /// Tear down the container stack left by a previous run
    Down,
    /// Write the compose manifest and show what `up` would start
    Plan,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn up_flags() {
        let cli = Cli::try_parse_from(["stackup", "-v", "up", "--skip-install", "--concurrency", "2"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Up {
                skip_install,
                concurrency,
                no_follow,
            } => {
                assert!(skip_install);
                assert_eq!(concurrency, Some(2));
                assert!(!no_follow);
            }
            _ => panic!("expected up"),
        }
    }
}
