// SPDX-License-Identifier: Apache-2.0

//! Async supervision runtime for game-server processes.
//!
//! The [`Registry`] owns every launched child: it builds the command line,
//! captures output into per-run logs, serializes lifecycle operations per
//! instance and cleans up exactly once when a process exits, however it exits.

pub mod backup;
pub mod error;
pub mod events;
pub mod launch;
pub mod log_sink;
pub mod probe;
pub mod registry;
pub mod signal;
pub mod stats;

pub use backup::{Archiver, BackupReport};
pub use error::{ConfigError, ProbeError, Result, SupervisorError};
pub use events::{EventBus, LifecycleEvent, LifecycleState};
pub use launch::LaunchPlan;
pub use probe::{ProcessStats, Prober};
pub use registry::{Descriptor, ExitReport, Registry, StartReport, StatusPayload};
pub use signal::KillSignal;
pub use stats::HostStats;

/// Returns crate version for runtime diagnostics/tests.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    #[test]
    fn version_matches_manifest() {
        assert_eq!(super::version(), env!("CARGO_PKG_VERSION"));
    }
}
