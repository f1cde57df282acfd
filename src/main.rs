//! tailguard - tailscaled and AdGuard Home in one container
//!
//! Container entrypoint that prepares directories and the local resolver,
//! brings up tailscaled, and keeps it and AdGuard Home running until the
//! container is stopped.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tailguard_core::commands::Binaries;
use tailguard_core::{error::TailguardError, init_logging};
use tracing::error;

mod cli;

#[derive(Parser)]
#[command(name = "tailguard")]
#[command(about = "Supervise tailscaled and AdGuard Home as one container entrypoint")]
struct Cli {
    /// Path to the tailscaled daemon
    #[arg(long, global = true, default_value = "/usr/bin/tailscaled")]
    tailscaled: PathBuf,

    /// Path to the tailscale control CLI
    #[arg(long, global = true, default_value = "/usr/bin/tailscale")]
    tailscale: PathBuf,

    /// Path to the AdGuard Home binary
    #[arg(long, global = true, default_value = "/usr/local/bin/AdGuardHome")]
    adguard: PathBuf,

    /// Resolver file to point at AdGuard Home
    #[arg(long, global = true, default_value = tailguard_core::dns::RESOLV_CONF)]
    resolv_conf: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor (default)
    Run,
    /// Print the configuration resolved from the environment
    Config,
}

fn main() {
    // Initialize logging
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let cli = Cli::parse();
    let binaries = Binaries {
        tailscaled: cli.tailscaled,
        tailscale: cli.tailscale,
        adguard: cli.adguard,
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cli::run::run_supervisor(binaries, cli.resolv_conf),
        Commands::Config => cli::config::print_config(),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            let exit_code = match e {
                // A child died, startup could not complete, or reaping failed
                TailguardError::Supervisor(_) => 1,
                // Runtime or signal handler setup
                TailguardError::Io(_) => 1,
                TailguardError::Json(_) => 1,
            };

            error!("{}", e);
            std::process::exit(exit_code);
        }
    }
}
