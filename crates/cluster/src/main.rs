//! `taloslab`: create, inspect and destroy local Talos clusters.

// Allow async functions that don't use await
#![allow(clippy::unused_async)]

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use talos_cluster::commands::create::CreateCommand;
use talos_cluster::commands::destroy::DestroyCommand;
use talos_cluster::commands::launch::LaunchCommand;
use talos_cluster::commands::machineconfig::MachineConfigCommand;
use talos_cluster::commands::show::ShowCommand;
use talos_cluster::commands::start::StartCommand;
use talos_cluster::{ui, CreateError};

/// Local Talos clusters on docker or qemu.
#[derive(Parser)]
#[command(
    name = "taloslab",
    version,
    about = "Create, inspect and destroy local Talos clusters",
    long_about = "Create, inspect and destroy local Talos clusters.\n\n\
                  Nodes run as docker containers or qemu virtual machines.\n\
                  Cluster state lives under ~/.talos/clusters and the client\n\
                  config is merged into the file named by TALOSCONFIG."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
enum Commands {
    /// Create a local Talos cluster.
    Create(CreateCommand),

    /// Destroy a local Talos cluster.
    Destroy(DestroyCommand),

    /// Show a local Talos cluster.
    Show(ShowCommand),

    /// Start the nodes of a stopped cluster.
    Start(StartCommand),

    /// Generate and patch machine configs.
    #[command(name = "machineconfig")]
    MachineConfig(MachineConfigCommand),

    #[command(name = "qemu-launch", hide = true)]
    QemuLaunch(LaunchCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(2));
        }
    };

    // RUST_LOG wins over the verbosity flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info,talos_cluster=debug,provision=debug,machinery=debug")
        } else {
            EnvFilter::new("warn,talos_cluster=info,provision=info,machinery=info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Create(cmd) => cmd.run().await,
        Commands::Destroy(cmd) => cmd.run().await,
        Commands::Show(cmd) => cmd.run().await,
        Commands::Start(cmd) => cmd.run().await,
        Commands::MachineConfig(cmd) => cmd.run().await,
        Commands::QemuLaunch(cmd) => cmd.run().await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::print_error(&format!("{e:#}"));
            ExitCode::from(exit_code(&e))
        }
    }
}

/// 2 for usage errors anywhere in the chain, 1 otherwise.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CreateError>())
        .map_or(1, |e| u8::try_from(e.exit_code()).unwrap_or(1))
}
