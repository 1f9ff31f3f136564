// SPDX-License-Identifier: Apache-2.0

//! Command handler for `keeper stats`.

use colored::Colorize;
use std::process;

use keeper_runtime::{HostStats, Registry};

/// Executes the `keeper stats` command.
pub fn execute(json: bool) {
    let layout = super::layout_or_exit();
    let stats = Registry::new(&layout).host_stats();

    if json {
        match serde_json::to_string_pretty(&stats) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                eprintln!("{} Failed to render stats: {}", "✗".red().bold(), e);
                process::exit(1);
            }
        }
        return;
    }
    print_host_stats(&stats);
}

pub(crate) fn print_host_stats(stats: &HostStats) {
    println!(
        "{} Host {}:\n",
        "✓".green().bold(),
        stats.hostname.as_deref().unwrap_or("unknown").cyan()
    );
    println!("  {:<12} {}", "CPUs:".bold(), stats.cpu_count);
    println!(
        "  {:<12} {:.2} {:.2} {:.2}",
        "Load:".bold(),
        stats.load_average.one,
        stats.load_average.five,
        stats.load_average.fifteen
    );
    println!(
        "  {:<12} {} available of {}",
        "Memory:".bold(),
        format_bytes(stats.available_memory),
        format_bytes(stats.total_memory)
    );
    println!("  {:<12} {}", "Uptime:".bold(), format_uptime(stats.uptime_secs));

    if stats.instances.is_empty() {
        return;
    }
    println!();
    println!(
        "  {:<16} {:<8} {:>7} {:>7} {:>10}",
        "INSTANCE".bold(),
        "PID".bold(),
        "CPU%".bold(),
        "MEM%".bold(),
        "RSS".bold()
    );
    for instance in &stats.instances {
        println!(
            "  {:<16} {:<8} {:>7.1} {:>7.1} {:>10}",
            instance.name,
            instance.process.pid,
            instance.process.cpu_percent,
            instance.process.memory_percent,
            format_bytes(instance.process.resident_memory_bytes)
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m {}s", secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_use_binary_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn uptime_is_compact() {
        assert_eq!(format_uptime(59), "0m 59s");
        assert_eq!(format_uptime(3_720), "1h 2m");
        assert_eq!(format_uptime(90_000), "1d 1h 0m");
    }
}
