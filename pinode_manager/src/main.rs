use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pinode_manager::commands;

#[derive(Parser)]
#[command(name = "pinode")]
#[command(about = "PINODE - Raspberry Pi sensor/actuator gateway")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway in the foreground (JSON lines on stdin/stdout)
    Run {
        /// Config file (defaults to the standard search paths)
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Debug logging
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },

    /// Validate a config and list every device value
    Check {
        /// Config file (defaults to the standard search paths)
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },

    /// Diagnose the host for GPIO, I2C and camera support
    Doctor {
        /// Show compiled backends next to each check
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },

    /// List compiled backends and device kinds
    Backends,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    // stdout carries JSON, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run_command(cli.command) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run { config, verbose } => {
            init_logging(verbose);
            commands::run::execute_run(config)
        }
        Commands::Check { config } => {
            init_logging(false);
            commands::check::run_check(config)
        }
        Commands::Doctor { verbose } => commands::doctor::run_doctor(verbose),
        Commands::Backends => {
            commands::backends::run_backends();
            Ok(())
        }
    }
}
