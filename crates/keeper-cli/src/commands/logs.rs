// SPDX-License-Identifier: Apache-2.0

//! Command handler for `keeper logs`.

use colored::Colorize;
use std::process;

use keeper_config::{Settings, DEFAULT_INSTANCE};
use keeper_runtime::Registry;

/// Executes the `keeper logs` command.
pub fn execute(tail: u32) {
    let layout = super::layout_or_exit();
    let instance = Settings::load(&layout.settings_path())
        .map(|settings| settings.instance)
        .unwrap_or_else(|_| DEFAULT_INSTANCE.to_string());
    let registry = Registry::new(&layout);

    let lines = match registry.tail_logs(&instance, tail as usize) {
        Ok(l) => l,
        Err(e) => {
            eprintln!(
                "{} Failed to read logs for {}: {}",
                "✗".red().bold(),
                instance.cyan(),
                e
            );
            process::exit(1);
        }
    };

    if lines.is_empty() {
        println!(
            "{} No logs recorded for {} yet.",
            "!".yellow().bold(),
            instance.cyan()
        );
        return;
    }

    println!(
        "{} Last {} log line(s) for {}:\n",
        "✓".green().bold(),
        lines.len(),
        instance.cyan()
    );

    for line in lines {
        println!("  {}", line);
    }
}
