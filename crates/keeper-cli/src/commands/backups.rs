// SPDX-License-Identifier: Apache-2.0

//! Command handler for `keeper backups`.

use colored::Colorize;
use std::process;

use keeper_runtime::Registry;

/// Executes the `keeper backups` command.
pub fn execute() {
    let layout = super::layout_or_exit();
    let settings = super::settings_or_exit(&layout);
    let registry = Registry::new(&layout);

    let snapshots = match registry.list_backups(&settings.instance) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} Failed to list backups: {}", "✗".red().bold(), e);
            process::exit(1);
        }
    };

    if snapshots.is_empty() {
        println!(
            "{} No backups for {} yet.",
            "!".yellow().bold(),
            settings.instance.cyan()
        );
        println!("  Run {} to create one.", "keeper backup".bold());
        return;
    }

    println!(
        "{} {} backup(s) for {}:\n",
        "✓".green().bold(),
        snapshots.len(),
        settings.instance.cyan()
    );
    for path in snapshots {
        println!("  {}", path.display());
    }
}
