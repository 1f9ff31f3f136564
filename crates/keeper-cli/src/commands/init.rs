// SPDX-License-Identifier: Apache-2.0

//! Command handler for `keeper init`.

use colored::Colorize;
use std::fs;
use std::process;

use keeper_config::memory::is_valid_heap_size;
use keeper_config::Settings;

/// Executes the `keeper init` command.
pub fn execute(
    jar: &str,
    min_memory: Option<String>,
    max_memory: Option<String>,
    optimized: bool,
    force: bool,
) {
    let layout = super::layout_or_exit();
    let settings_path = layout.settings_path();

    if settings_path.exists() && !force {
        eprintln!(
            "{} Settings already exist at {}.",
            "✗".red().bold(),
            settings_path.display()
        );
        println!("  Pass {} to overwrite them.", "--force".bold());
        process::exit(1);
    }

    let mut settings = Settings::default_for(&layout);
    settings.launch.jar_or_binary = jar.to_string();
    settings.launch.use_optimized_flags = optimized;
    if let Some(min) = min_memory {
        settings.launch.min_memory = min;
    }
    if let Some(max) = max_memory {
        settings.launch.max_memory = max;
    }
    for size in [&settings.launch.min_memory, &settings.launch.max_memory] {
        if !is_valid_heap_size(size) {
            eprintln!(
                "{} Invalid heap size {} (expected e.g. 512M or 2G).",
                "✗".red().bold(),
                size.cyan()
            );
            process::exit(1);
        }
    }

    if let Err(e) = fs::create_dir_all(&settings.launch.working_dir) {
        eprintln!(
            "{} Failed to create {}: {}",
            "✗".red().bold(),
            settings.launch.working_dir.display(),
            e
        );
        process::exit(1);
    }
    if let Err(e) = settings.save(&settings_path) {
        eprintln!("{} {}", "✗".red().bold(), e);
        process::exit(1);
    }

    println!(
        "{} Wrote {}",
        "✓".green().bold(),
        settings_path.display()
    );
    println!(
        "  Place {} in {}, then run {}.",
        jar.cyan(),
        settings.launch.working_dir.display(),
        "keeper run".bold()
    );
}
