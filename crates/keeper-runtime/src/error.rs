// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Bad or missing launch inputs. Reported to the caller, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),
    #[error("executable name must not be empty")]
    EmptyExecutable,
    #[error("working directory does not exist: {}", .0.display())]
    WorkingDirMissing(PathBuf),
    #[error("invalid heap size {0:?} (expected digits with optional K/M/G)")]
    InvalidMemory(String),
    #[error("minimum heap {min} exceeds maximum heap {max}")]
    MemoryBoundsInverted { min: String, max: String },
}

/// Failures surfaced by registry operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("instance {0} is already running")]
    AlreadyRunning(String),
    #[error("instance {0} is not running")]
    NotRunning(String),
    #[error("another lifecycle operation is in progress for {0}")]
    OperationInProgress(String),
    #[error("instance {name} did not exit within {timeout:?}")]
    StopTimedOut { name: String, timeout: Duration },
    #[error("failed to deliver shutdown message to {name}: {source}")]
    ShutdownMessageFailed {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write command to {name}: {source}")]
    CommandFailed {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to signal {name}: {reason}")]
    SignalFailed { name: String, reason: String },
    #[error("no configuration is known for instance {0}")]
    NotRegistered(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Liveness probe failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("process {0} not found")]
    NotFound(u32),
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;
