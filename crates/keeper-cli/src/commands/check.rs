// SPDX-License-Identifier: Apache-2.0

//! Command handler for `keeper check`.

use colored::Colorize;
use std::process;

use keeper_runtime::launch;

/// Executes the `keeper check` command.
pub fn execute() {
    let layout = super::layout_or_exit();
    let settings = super::settings_or_exit(&layout);

    let plan = match launch::build(&settings.launch) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!(
                "{} Launch configuration for {} is invalid: {}",
                "✗".red().bold(),
                settings.instance.cyan(),
                e
            );
            process::exit(1);
        }
    };

    println!(
        "{} Launch configuration for {} is valid.\n",
        "✓".green().bold(),
        settings.instance.cyan()
    );
    println!("  {:<14} {}", "Directory:".bold(), plan.working_dir.display());
    println!("  {:<14} {}", "Command:".bold(), plan.argv().join(" "));
    println!(
        "  {:<14} {}s",
        "Stop timeout:".bold(),
        settings.stop_timeout_secs
    );
}
