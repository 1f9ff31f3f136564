// SPDX-License-Identifier: Apache-2.0

//! Side-effect-free liveness checks and point-in-time process figures.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use sysinfo::{MemoryRefreshKind, Pid, ProcessStatus, ProcessesToUpdate, System};

use crate::error::ProbeError;

/// Resource figures for one process, sampled at call time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStats {
    pub pid: u32,
    /// CPU usage since the previous sample of this pid, in percent of one core.
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub virtual_memory_bytes: u64,
    pub resident_memory_bytes: u64,
}

/// Liveness prober backed by a long-lived `sysinfo` snapshot.
///
/// The snapshot is kept between calls so CPU usage is measured against the
/// previous sample instead of averaged over the process lifetime.
pub struct Prober {
    system: Mutex<System>,
}

impl Default for Prober {
    fn default() -> Self {
        Prober::new()
    }
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prober").finish_non_exhaustive()
    }
}

impl Prober {
    pub fn new() -> Self {
        Prober {
            system: Mutex::new(System::new()),
        }
    }

    /// Returns whether `pid` refers to a live (non-zombie) process.
    pub fn is_alive(&self, pid: u32) -> bool {
        if !signal_probe(pid) {
            return false;
        }
        // A zombie still answers the null signal but is dead for supervision.
        let mut system = self.lock();
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        match system.process(sys_pid) {
            Some(process) => !matches!(
                process.status(),
                ProcessStatus::Zombie | ProcessStatus::Dead
            ),
            None => cfg!(unix),
        }
    }

    /// Samples CPU and memory figures for `pid`.
    pub fn stats(&self, pid: u32) -> Result<ProcessStats, ProbeError> {
        if !self.is_alive(pid) {
            return Err(ProbeError::NotFound(pid));
        }

        let mut system = self.lock();
        system.refresh_memory_specifics(MemoryRefreshKind::new().with_ram());
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        let total_memory = system.total_memory();
        let process = system.process(sys_pid).ok_or(ProbeError::NotFound(pid))?;

        let resident = process.memory();
        let memory_percent = if total_memory == 0 {
            0.0
        } else {
            (resident as f64 / total_memory as f64 * 100.0) as f32
        };

        Ok(ProcessStats {
            pid,
            cpu_percent: process.cpu_usage(),
            memory_percent,
            virtual_memory_bytes: process.virtual_memory(),
            resident_memory_bytes: resident,
        })
    }

    /// All transitive children of `pid` currently in the process table.
    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut system = self.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let mut found = Vec::new();
        let mut frontier = vec![Pid::from_u32(pid)];
        while let Some(parent) = frontier.pop() {
            for (child_pid, process) in system.processes() {
                if process.parent() == Some(parent) && !found.contains(&child_pid.as_u32()) {
                    found.push(child_pid.as_u32());
                    frontier.push(*child_pid);
                }
            }
        }
        found
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Null-signal probe: checks existence without affecting the target.
#[cfg(unix)]
fn signal_probe(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as NixPid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(NixPid::from_raw(raw), None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn signal_probe(pid: u32) -> bool {
    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    system.process(sys_pid).is_some()
}
