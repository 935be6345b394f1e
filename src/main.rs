use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use fleetpack::config::DEFAULT_UNITS_FILE;
use fleetpack::errors::{RunError, WorkerError};
use fleetpack::ui::UiMode;

mod cmd;

#[derive(Parser)]
#[command(name = "fleetpack")]
#[command(version, about = "Distributed build orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Partition the units across the configured nodes and build them
    Build {
        /// Config file (defaults to fleetpack.toml or fleetpack.json in the project)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Progress endpoint port, overriding the config
        #[arg(long)]
        port: Option<u16>,

        /// Output mode: full, minimal or json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Show how units would be partitioned, without contacting any node
    Plan {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Build the units in a working directory (run on each node)
    Worker {
        /// Directory holding the units file (defaults to the project dir)
        #[arg(long)]
        root: Option<PathBuf>,

        #[arg(long, default_value = DEFAULT_UNITS_FILE)]
        units_file: String,

        /// Units built concurrently
        #[arg(short, long, default_value = "1")]
        jobs: usize,
    },
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("FLEETPACK_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Exit status for a failed command.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<RunError>() {
        e.exit_code()
    } else if let Some(e) = err.downcast_ref::<WorkerError>() {
        e.exit_code()
    } else {
        1
    }
}

fn report(err: &anyhow::Error) {
    if let Some(RunError::Verification { missing }) = err.downcast_ref::<RunError>() {
        for name in missing {
            eprintln!("  missing: {}", name);
        }
    }
    eprintln!("Failed: {:#}", err);
}

async fn run(cli: &Cli) -> Result<()> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Build { config, port, ui } => {
            cmd::cmd_build(
                &project_dir,
                config.as_deref(),
                *port,
                UiMode::parse(ui),
                cli.verbose,
            )
            .await?
        }
        Commands::Plan { config } => cmd::cmd_plan(&project_dir, config.as_deref())?,
        Commands::Worker {
            root,
            units_file,
            jobs,
        } => {
            let root = root.clone().unwrap_or(project_dir);
            cmd::cmd_worker(&root, units_file, *jobs).await?
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::from(exit_code(&e))
        }
    }
}
