// SPDX-License-Identifier: Apache-2.0

//! Translation of a [`LaunchConfig`] into a concrete command line.

use std::path::PathBuf;

use keeper_config::memory::{heap_size_bytes, is_valid_heap_size};
use keeper_config::LaunchConfig;

use crate::error::ConfigError;

/// G1 tuning flags applied when `use_optimized_flags` is set.
pub const OPTIMIZED_GC_FLAGS: &[&str] = &[
    "-XX:+UseG1GC",
    "-XX:+ParallelRefProcEnabled",
    "-XX:MaxGCPauseMillis=200",
    "-XX:+UnlockExperimentalVMOptions",
    "-XX:+DisableExplicitGC",
    "-XX:+AlwaysPreTouch",
    "-XX:G1NewSizePercent=30",
    "-XX:G1MaxNewSizePercent=40",
    "-XX:G1HeapRegionSize=8M",
    "-XX:G1ReservePercent=20",
    "-XX:G1HeapWastePercent=5",
    "-XX:G1MixedGCCountTarget=4",
    "-XX:InitiatingHeapOccupancyPercent=15",
    "-XX:G1MixedGCLiveThresholdPercent=90",
    "-XX:G1RSetUpdatingPauseTimePercent=5",
    "-XX:SurvivorRatio=32",
    "-XX:+PerfDisableSharedMem",
    "-XX:MaxTenuringThreshold=1",
    "-Dusing.aikars.flags=https://mcflags.emc.gs",
    "-Daikars.new.flags=true",
];

/// Fully resolved program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchPlan {
    /// Program followed by its arguments, for display.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Validates `config` and builds its launch plan.
///
/// Only reads the filesystem to check that the working directory and jar
/// exist; nothing is spawned.
pub fn build(config: &LaunchConfig) -> Result<LaunchPlan, ConfigError> {
    if config.jar_or_binary.trim().is_empty() {
        return Err(ConfigError::EmptyExecutable);
    }
    for size in [&config.min_memory, &config.max_memory] {
        if !is_valid_heap_size(size) {
            return Err(ConfigError::InvalidMemory(size.clone()));
        }
    }
    if let (Some(min), Some(max)) = (
        heap_size_bytes(&config.min_memory),
        heap_size_bytes(&config.max_memory),
    ) {
        if min > max {
            return Err(ConfigError::MemoryBoundsInverted {
                min: config.min_memory.clone(),
                max: config.max_memory.clone(),
            });
        }
    }
    if !config.working_dir.is_dir() {
        return Err(ConfigError::WorkingDirMissing(config.working_dir.clone()));
    }
    let executable = config.executable_path();
    if !executable.is_file() {
        return Err(ConfigError::ExecutableNotFound(executable));
    }

    let mut args = vec![
        format!("-Xms{}", config.min_memory.trim()),
        format!("-Xmx{}", config.max_memory.trim()),
    ];
    if config.use_optimized_flags {
        args.extend(OPTIMIZED_GC_FLAGS.iter().map(|flag| flag.to_string()));
    }
    args.extend(config.extra_args.iter().cloned());
    args.push("-jar".to_string());
    args.push(config.jar_or_binary.clone());
    args.push("--nogui".to_string());
    args.extend(config.program_args.iter().cloned());

    Ok(LaunchPlan {
        program: config.java_path.clone(),
        args,
        working_dir: config.working_dir.clone(),
    })
}
