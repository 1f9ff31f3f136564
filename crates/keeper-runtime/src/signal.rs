// SPDX-License-Identifier: Apache-2.0

//! Forced termination of a process together with its descendants.

use std::fmt;
use std::str::FromStr;

use crate::probe::Prober;

/// Signal delivered by [`crate::Registry::kill`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KillSignal {
    #[default]
    Kill,
    Term,
    Int,
    Hup,
    Quit,
}

impl fmt::Display for KillSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            KillSignal::Kill => "SIGKILL",
            KillSignal::Term => "SIGTERM",
            KillSignal::Int => "SIGINT",
            KillSignal::Hup => "SIGHUP",
            KillSignal::Quit => "SIGQUIT",
        };
        write!(f, "{value}")
    }
}

impl FromStr for KillSignal {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        let raw = normalized.strip_prefix("SIG").unwrap_or(&normalized);
        match raw {
            "KILL" | "9" => Ok(KillSignal::Kill),
            "TERM" | "15" => Ok(KillSignal::Term),
            "INT" | "2" => Ok(KillSignal::Int),
            "HUP" | "1" => Ok(KillSignal::Hup),
            "QUIT" | "3" => Ok(KillSignal::Quit),
            _ => Err(format!("unsupported signal: {value}")),
        }
    }
}

#[cfg(unix)]
impl From<KillSignal> for nix::sys::signal::Signal {
    fn from(signal: KillSignal) -> Self {
        use nix::sys::signal::Signal;
        match signal {
            KillSignal::Kill => Signal::SIGKILL,
            KillSignal::Term => Signal::SIGTERM,
            KillSignal::Int => Signal::SIGINT,
            KillSignal::Hup => Signal::SIGHUP,
            KillSignal::Quit => Signal::SIGQUIT,
        }
    }
}

/// Signals `pid`, its process group and every descendant found in the
/// process table. Returns without waiting for exit.
#[cfg(unix)]
pub fn signal_tree(prober: &Prober, pid: u32, signal: KillSignal) -> Result<(), String> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| format!("pid {pid} out of range"))?;
    let signal = Signal::from(signal);
    // Collected before signalling: once the root dies its children are reparented.
    let descendants = prober.descendants(pid);

    let group = killpg(Pid::from_raw(raw), signal);
    let direct = kill(Pid::from_raw(raw), signal);
    for child in descendants {
        if let Ok(child) = i32::try_from(child) {
            let _ = kill(Pid::from_raw(child), signal);
        }
    }

    match (group, direct) {
        (Ok(()), _) | (_, Ok(())) => Ok(()),
        (Err(Errno::ESRCH), Err(Errno::ESRCH)) => Ok(()),
        (_, Err(e)) => Err(format!("failed to send {signal:?} to {pid}: {e}")),
    }
}

/// Terminates `pid` and its tree with `taskkill /T /F`.
#[cfg(windows)]
pub fn signal_tree(_prober: &Prober, pid: u32, _signal: KillSignal) -> Result<(), String> {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map_err(|e| format!("failed to run taskkill: {e}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("taskkill failed for process {pid}"))
    }
}

#[cfg(not(any(unix, windows)))]
pub fn signal_tree(_prober: &Prober, _pid: u32, _signal: KillSignal) -> Result<(), String> {
    Err("process termination is not supported on this platform".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_signal_names() {
        assert_eq!("kill".parse::<KillSignal>().unwrap(), KillSignal::Kill);
        assert_eq!("SIGTERM".parse::<KillSignal>().unwrap(), KillSignal::Term);
        assert_eq!(" int ".parse::<KillSignal>().unwrap(), KillSignal::Int);
        assert_eq!("9".parse::<KillSignal>().unwrap(), KillSignal::Kill);
        assert!("usr1".parse::<KillSignal>().is_err());
    }

    #[test]
    fn default_is_kill() {
        assert_eq!(KillSignal::default(), KillSignal::Kill);
        assert_eq!(KillSignal::default().to_string(), "SIGKILL");
    }

    #[cfg(unix)]
    #[test]
    fn signal_tree_on_gone_process_is_ok() {
        let mut child = std::process::Command::new("sh")
            .args(["-c", "exit 0"])
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let prober = Prober::new();
        assert!(signal_tree(&prober, pid, KillSignal::Kill).is_ok());
    }
}
