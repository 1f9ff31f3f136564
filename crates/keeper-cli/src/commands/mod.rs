// SPDX-License-Identifier: Apache-2.0

//! CLI subcommand declarations and dispatch.

pub mod backup;
pub mod backups;
pub mod check;
pub mod init;
pub mod logs;
pub mod run;
pub mod stats;

use clap::Subcommand;
use colored::Colorize;
use std::process;

use keeper_config::{Layout, Settings};

use crate::paths;

/// Top-level CLI subcommands supported by `keeper`.
#[derive(Subcommand)]
pub enum Commands {
    /// Write keeper.toml and create the instance data directory
    Init {
        /// Server jar, relative to the instance directory
        #[arg(long, default_value = "server.jar")]
        jar: String,

        /// Initial heap size (e.g. 1G, 512M)
        #[arg(long)]
        min_memory: Option<String>,

        /// Maximum heap size (e.g. 4G)
        #[arg(long)]
        max_memory: Option<String>,

        /// Enable the tuned G1 garbage collector flags
        #[arg(long)]
        optimized: bool,

        /// Overwrite an existing keeper.toml
        #[arg(long)]
        force: bool,
    },

    /// Validate settings and print the resolved command line
    Check,

    /// Start the server and attach an interactive console
    Run,

    /// Snapshot the server's config files and world
    Backup,

    /// List backups, newest first
    Backups,

    /// Show the latest run's console log
    Logs {
        /// Number of lines to show
        #[arg(long, default_value = "50")]
        tail: u32,
    },

    /// Show host resource usage
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Routes a parsed subcommand to its implementation.
pub fn execute(command: Commands) {
    match command {
        Commands::Init {
            jar,
            min_memory,
            max_memory,
            optimized,
            force,
        } => init::execute(&jar, min_memory, max_memory, optimized, force),
        Commands::Check => check::execute(),
        Commands::Run => run::execute(),
        Commands::Backup => backup::execute(),
        Commands::Backups => backups::execute(),
        Commands::Logs { tail } => logs::execute(tail),
        Commands::Stats { json } => stats::execute(json),
    }
}

pub(crate) fn layout_or_exit() -> Layout {
    match paths::layout() {
        Some(layout) => layout,
        None => {
            eprintln!("{} Could not determine home directory.", "✗".red().bold());
            process::exit(1);
        }
    }
}

pub(crate) fn settings_or_exit(layout: &Layout) -> Settings {
    let path = layout.settings_path();
    if !path.exists() {
        eprintln!(
            "{} No settings found at {}.",
            "✗".red().bold(),
            path.display()
        );
        println!("  Run {} to create them.", "keeper init".bold());
        process::exit(1);
    }
    match Settings::load(&path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            process::exit(1);
        }
    }
}

pub(crate) fn tokio_runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} Failed to start async runtime: {}", "✗".red().bold(), e);
            process::exit(1);
        }
    }
}
