// SPDX-License-Identifier: Apache-2.0

//! Command handler for `keeper backup`.

use colored::Colorize;
use std::process;

use keeper_runtime::{BackupReport, Registry};

/// Executes the `keeper backup` command.
pub fn execute() {
    let layout = super::layout_or_exit();
    let settings = super::settings_or_exit(&layout);
    let registry = Registry::new(&layout);
    registry.remember(&settings.instance, settings.launch.clone());

    let runtime = super::tokio_runtime();
    match runtime.block_on(registry.backup(&settings.instance)) {
        Ok(report) => print_report(&settings.instance, &report),
        Err(e) => {
            eprintln!(
                "{} Backup of {} failed: {}",
                "✗".red().bold(),
                settings.instance.cyan(),
                e
            );
            process::exit(1);
        }
    }
}

pub(crate) fn print_report(instance: &str, report: &BackupReport) {
    println!(
        "{} Backed up {} to {}",
        "✓".green().bold(),
        instance.cyan(),
        report.path.display()
    );
    if report.files_included.is_empty() {
        println!(
            "  {} No server files were present; the snapshot is empty.",
            "!".yellow().bold()
        );
        return;
    }
    for entry in &report.files_included {
        println!("  {}", entry);
    }
}
