// SPDX-License-Identifier: Apache-2.0

//! Keeper CLI binary entrypoint.

mod commands;
pub mod paths;

use clap::Parser;
use commands::Commands;
use tracing_subscriber::EnvFilter;

/// Keeper, a supervisor and operator console for a Minecraft-style game server
#[derive(Parser)]
#[command(name = "keeper", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Parses CLI arguments and dispatches to command handlers.
fn main() {
    init_tracing();
    let cli = Cli::parse();
    commands::execute(cli.command);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
