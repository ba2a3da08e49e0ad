//! Haptic Relay CLI.
//!
//! Relays haptic playback commands from a game log or from WebSocket
//! clients into the haptic engine.

mod check;
mod run;
mod send;
mod signals;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "haptic-relay", version, about, long_about = None)]
struct Cli {
    /// Path to the relay configuration file
    #[arg(short, long, global = true, default_value = "relay.yml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the relay and run until interrupted
    Run(run::RunArgs),

    /// Validate the configuration without starting anything
    Check(check::CheckArgs),

    /// Send command lines to a running relay's socket server
    Send(send::SendArgs),
}

/// Console-only logging for the short-lived subcommands.
fn init_console_logging(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(relay_core::logging::default_level(verbose))
    });
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("logging not initialized: {err}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run::execute(&cli.config, cli.verbose, args).await,
        Commands::Check(args) => {
            init_console_logging(cli.verbose);
            check::execute(&cli.config, args)
        }
        Commands::Send(args) => {
            init_console_logging(cli.verbose);
            send::execute(&cli.config, args).await
        }
    }
}
