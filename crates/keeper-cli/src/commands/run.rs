// SPDX-License-Identifier: Apache-2.0

//! Command handler for `keeper run`: starts the configured server and
//! attaches an operator console to it.
//!
//! Plain lines are forwarded to the server's console. Lines starting with a
//! dot are handled by keeper itself (see [`HELP`]).

use colored::Colorize;
use std::process;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use keeper_config::{Layout, Settings};
use keeper_runtime::{
    KillSignal, LifecycleEvent, LifecycleState, Registry, StartReport, SupervisorError,
};

const HELP: &str = "\
  .status          show process state, pid and uptime
  .stop            graceful shutdown, waits for the stop timeout
  .start           launch again after a stop
  .restart         graceful shutdown followed by a fresh launch
  .kill [SIGNAL]   signal the whole process tree (default SIGKILL)
  .backup          snapshot config files and world
  .stats           host and process resource usage
  .logs [N]        last N console log lines (default 20)
  .quit            stop the server and leave";

/// How long `.quit` waits for the process tree to vanish after a forced kill.
const KILL_WAIT: Duration = Duration::from_secs(10);

enum Flow {
    Continue,
    Quit,
}

/// Executes the `keeper run` command.
pub fn execute() {
    let layout = super::layout_or_exit();
    let settings = super::settings_or_exit(&layout);
    let runtime = super::tokio_runtime();

    let code = runtime.block_on(console(layout, settings));
    // The stdin reader sits on a blocking thread that cannot be cancelled.
    runtime.shutdown_background();
    if code != 0 {
        process::exit(code);
    }
}

async fn console(layout: Layout, settings: Settings) -> i32 {
    let registry = Registry::new(&layout);
    let name = settings.instance.clone();
    let timeout = Duration::from_secs(settings.stop_timeout_secs);
    let mut events = registry.subscribe();

    match registry.start(&name, settings.launch.clone()).await {
        Ok(report) => print_started(&name, &report),
        Err(e) => {
            eprintln!("{} Failed to start {}: {}", "✗".red().bold(), name.cyan(), e);
            return 1;
        }
    }
    println!(
        "  Lines are sent to the server console; type {} for keeper commands.\n",
        ".help".bold()
    );

    // One line is handled at a time, off the loop, so events and Ctrl-C are
    // still serviced while a `.stop` or a blocked command is pending.
    let (done_tx, mut done_rx) = mpsc::channel::<Flow>(1);
    let mut pending: Option<JoinHandle<()>> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line(), if pending.is_none() => match line {
                Ok(Some(line)) => {
                    let registry = registry.clone();
                    let settings = settings.clone();
                    let done = done_tx.clone();
                    pending = Some(tokio::spawn(async move {
                        let flow = handle_line(&registry, &settings, timeout, line.trim()).await;
                        let _ = done.send(flow).await;
                    }));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("console input failed: {e}");
                    break;
                }
            },
            Some(flow) = done_rx.recv() => {
                pending = None;
                if let Flow::Quit = flow {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("missed {skipped} lifecycle event(s)"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n{} Interrupted, shutting down.", "!".yellow().bold());
                if let Some(handle) = pending.take() {
                    handle.abort();
                    // Wait for the abort to land so the lifecycle lock is free.
                    let _ = handle.await;
                }
                break;
            }
        }
    }

    shut_down(&registry, timeout).await
}

async fn handle_line(
    registry: &Registry,
    settings: &Settings,
    timeout: Duration,
    line: &str,
) -> Flow {
    let name = settings.instance.as_str();
    if line.is_empty() {
        return Flow::Continue;
    }
    if !line.starts_with('.') {
        if let Err(e) = registry.send_command(name, line).await {
            eprintln!("{} {}", "✗".red().bold(), e);
        }
        return Flow::Continue;
    }

    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();
    let argument = words.next();
    match command {
        ".help" => println!("{HELP}"),
        ".quit" | ".exit" => return Flow::Quit,
        ".status" => print_status(registry, name),
        ".stop" => match registry.stop(name, timeout).await {
            Ok(report) => println!(
                "{} {} stopped (exit code {}).",
                "✓".green().bold(),
                name.cyan(),
                describe_code(report.exit_code)
            ),
            Err(e @ SupervisorError::StopTimedOut { .. }) => {
                eprintln!("{} {}", "!".yellow().bold(), e);
                println!("  Use {} to force it.", ".kill".bold());
            }
            Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
        },
        ".start" => match registry.start(name, settings.launch.clone()).await {
            Ok(report) => print_started(name, &report),
            Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
        },
        ".restart" => match registry.restart(name, timeout).await {
            Ok(report) => print_started(name, &report),
            Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
        },
        ".kill" => {
            let signal = match argument.map(str::parse::<KillSignal>).transpose() {
                Ok(signal) => signal.unwrap_or_default(),
                Err(e) => {
                    eprintln!("{} {}", "✗".red().bold(), e);
                    return Flow::Continue;
                }
            };
            match registry.kill(name, signal) {
                Ok(()) => println!("{} Sent {} to {}.", "✓".green().bold(), signal, name.cyan()),
                Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
            }
        }
        ".backup" => match registry.backup(name).await {
            Ok(report) => super::backup::print_report(name, &report),
            Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
        },
        ".stats" => super::stats::print_host_stats(&registry.host_stats()),
        ".logs" => {
            let count = argument.and_then(|n| n.parse().ok()).unwrap_or(20);
            match registry.tail_logs(name, count) {
                Ok(lines) => {
                    for line in lines {
                        println!("  {}", line);
                    }
                }
                Err(e) => eprintln!("{} {}", "✗".red().bold(), e),
            }
        }
        other => eprintln!(
            "{} Unknown command {}; type {} for a list.",
            "!".yellow().bold(),
            other,
            ".help".bold()
        ),
    }
    Flow::Continue
}

/// Stops everything still running, forcing whatever outlives the timeout.
/// Returns the process exit code for keeper itself.
async fn shut_down(registry: &Registry, timeout: Duration) -> i32 {
    let mut code = 0;
    for (name, outcome) in registry.shutdown_all(timeout).await {
        match outcome {
            Ok(report) => println!(
                "{} {} stopped (exit code {}).",
                "✓".green().bold(),
                name.cyan(),
                describe_code(report.exit_code)
            ),
            Err(SupervisorError::NotRunning(_)) => {}
            Err(SupervisorError::StopTimedOut { .. }) => {
                println!(
                    "{} {} did not stop within {:?}; killing it.",
                    "!".yellow().bold(),
                    name.cyan(),
                    timeout
                );
                if let Err(e) = registry.kill(&name, KillSignal::Kill) {
                    eprintln!("{} {}", "✗".red().bold(), e);
                    code = 1;
                } else if !wait_until_stopped(registry, &name).await {
                    eprintln!(
                        "{} {} is still alive after SIGKILL.",
                        "✗".red().bold(),
                        name.cyan()
                    );
                    code = 1;
                }
            }
            Err(e) => {
                eprintln!("{} {}", "✗".red().bold(), e);
                code = 1;
            }
        }
    }
    code
}

async fn wait_until_stopped(registry: &Registry, name: &str) -> bool {
    let deadline = tokio::time::Instant::now() + KILL_WAIT;
    while tokio::time::Instant::now() < deadline {
        if !registry.status(name).running {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    !registry.status(name).running
}

fn print_started(name: &str, report: &StartReport) {
    println!(
        "{} Started {} (pid {}).",
        "✓".green().bold(),
        name.cyan(),
        report.pid
    );
    println!("  Output: {}", report.log_path.display());
    println!("  Errors: {}", report.error_log_path.display());
}

fn print_status(registry: &Registry, name: &str) {
    let status = registry.status(name);
    if !status.running {
        println!("  {} {}", name.cyan(), "stopped".dimmed());
        return;
    }
    let state = status
        .state
        .map(|s| s.to_string())
        .unwrap_or_else(|| "running".to_string());
    println!(
        "  {} {} pid={} uptime={}s",
        name.cyan(),
        state.green(),
        status.pid.map_or_else(|| "-".to_string(), |p| p.to_string()),
        status.uptime.unwrap_or(0) / 1000
    );
}

fn print_event(event: &LifecycleEvent) {
    let status = match event.status {
        LifecycleState::Running => event.status.to_string().green(),
        LifecycleState::Stopped => event.status.to_string().red(),
        LifecycleState::Starting | LifecycleState::Stopping => {
            event.status.to_string().yellow()
        }
    };
    let mut line = format!("[keeper] {} is {}", event.instance, status);
    if let Some(pid) = event.pid {
        line.push_str(&format!(" (pid {pid})"));
    }
    if event.status == LifecycleState::Stopped
        && (event.exit_code.is_some() || event.signal.is_some())
    {
        line.push_str(&format!(
            ", exit code {}",
            describe_code(event.exit_code)
        ));
        if let Some(signal) = event.signal {
            line.push_str(&format!(", signal {signal}"));
        }
    }
    println!("{}", line.dimmed());
}

fn describe_code(code: Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}
