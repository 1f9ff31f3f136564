// SPDX-License-Identifier: Apache-2.0

//! Host-wide figures combined with per-instance process stats.

use serde::Serialize;
use sysinfo::{MemoryRefreshKind, System};
use tracing::warn;

use crate::probe::{ProcessStats, Prober};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStats {
    pub name: String,
    #[serde(flatten)]
    pub process: ProcessStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
    pub hostname: Option<String>,
    pub cpu_count: usize,
    pub total_memory: u64,
    pub free_memory: u64,
    pub available_memory: u64,
    pub uptime_secs: u64,
    pub load_average: LoadAverage,
    pub instances: Vec<InstanceStats>,
}

/// Collects host figures plus stats for each `(name, pid)`.
///
/// An instance whose stats cannot be read is logged and left out.
pub fn collect(prober: &Prober, instances: &[(String, u32)]) -> HostStats {
    let instances = instances
        .iter()
        .filter_map(|(name, pid)| match prober.stats(*pid) {
            Ok(process) => Some(InstanceStats {
                name: name.clone(),
                process,
            }),
            Err(e) => {
                warn!(instance = %name, "skipping instance stats: {e}");
                None
            }
        })
        .collect();

    let (cpu_count, total_memory, free_memory, available_memory) = {
        let mut system = prober.lock();
        system.refresh_memory_specifics(MemoryRefreshKind::new().with_ram());
        system.refresh_cpu_usage();
        (
            system.cpus().len(),
            system.total_memory(),
            system.free_memory(),
            system.available_memory(),
        )
    };
    let load = System::load_average();

    HostStats {
        hostname: System::host_name(),
        cpu_count,
        total_memory,
        free_memory,
        available_memory,
        uptime_secs: System::uptime(),
        load_average: LoadAverage {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        },
        instances,
    }
}
